use crate::delegate::ComputeDelegate;
use crate::engine::CompileError;
use crate::source::AssetId;
use thiserror::Error;

/// A model source that cannot possibly be fetched. Raised before any I/O happens.
#[derive(Debug, Error)]
#[error("Invalid model source \"{uri}\": {reason}")]
pub struct InvalidSourceError {
    pub uri: String,
    pub reason: String,
}

impl InvalidSourceError {
    pub fn new(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "Unknown delegate \"{0}\"! Expected one of: default, metal, core-ml, nnapi, android-gpu"
)]
pub struct InvalidDelegateError(pub String);

#[derive(Debug, Error)]
#[error("No inference engine is installed! Call `ensure_engine_installed` once at startup.")]
pub struct EngineNotAvailableError;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to install inference engine \"{engine}\": {reason}")]
    VerifyFailed {
        engine: String,
        reason: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    InvalidSource(#[from] InvalidSourceError),
    #[error(transparent)]
    EngineNotAvailable(#[from] EngineNotAvailableError),
    #[error("Failed to resolve bundled asset {asset}: {reason}")]
    AssetResolution { asset: AssetId, reason: anyhow::Error },
    #[error("Failed to fetch model from \"{uri}\": {reason}")]
    Fetch { uri: String, reason: anyhow::Error },
    #[error("Model from \"{uri}\" is {size} bytes, larger than the configured limit of {limit} bytes")]
    TooLarge { uri: String, size: u64, limit: u64 },
    #[error("Delegate \"{delegate}\" is not available in engine \"{engine}\" on this platform")]
    UnsupportedDelegate {
        delegate: ComputeDelegate,
        engine: String,
    },
    #[error("Failed to load model from \"{uri}\": {cause}")]
    Compile {
        uri: String,
        #[source]
        cause: CompileError,
    },
    #[error("Model loading thread panicked: {0}")]
    ThreadPanicked(String),
}

impl LoadError {
    /// Whether the failure comes from the requested delegate rather than the model source.
    pub fn is_delegate_error(&self) -> bool {
        matches!(
            self,
            LoadError::UnsupportedDelegate { .. }
                | LoadError::Compile {
                    cause: CompileError::DelegateIncompatible(_),
                    ..
                }
        )
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Expected {expected} input buffers, but received {actual}")]
    Arity { expected: usize, actual: usize },
    #[error(
        "Input buffer {index} (\"{name}\") is {actual} bytes, but the input tensor expects {expected} bytes! Make sure to resize the input values accordingly."
    )]
    ShapeMismatch {
        index: usize,
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Tensor \"{0}\" has an element type with no fixed byte width")]
    UnsupportedElementType(String),
    #[error("Engine wrote {actual} bytes into output \"{name}\", expected {expected}")]
    OutputMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Model is busy running another inference")]
    Busy,
    #[error("Inference failed: {0}")]
    Engine(anyhow::Error),
    #[error("Interpreter lock poisoned: {0}")]
    Poisoned(String),
    #[error("Inference thread panicked: {0}")]
    ThreadPanicked(String),
}

impl<T> From<std::sync::PoisonError<T>> for InferenceError {
    fn from(error: std::sync::PoisonError<T>) -> Self {
        InferenceError::Poisoned(error.to_string())
    }
}

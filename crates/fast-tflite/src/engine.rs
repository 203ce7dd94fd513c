//! The seam to the wrapped inference engine.
//!
//! Kernels, delegates and model parsing all live behind [`Engine`] and [`Interpreter`]. The engine
//! is installed once per process with [`ensure_engine_installed`]; loaders built with
//! [`ModelLoader::from_installed`](crate::ModelLoader::from_installed) pick it up from there.

use crate::delegate::ComputeDelegate;
use crate::error::{EngineNotAvailableError, InstallError};
use crate::tensor::TensorDescriptor;
use crate::{print_debug, print_err, print_info};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use thiserror::Error;

/// Why an engine refused to turn bytes into an interpreter.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("the bytes are not a valid compiled model: {0}")]
    InvalidModel(anyhow::Error),
    #[error("the model cannot run on the \"{0}\" delegate")]
    DelegateIncompatible(ComputeDelegate),
    #[error("failed to allocate memory for input/output tensors: {0}")]
    Allocation(anyhow::Error),
}

/// A compiled model together with its interpreter state buffers.
///
/// Implementations are entered by a single thread at a time; the owning
/// [`ModelHandle`](crate::ModelHandle) guarantees exclusive access.
pub trait Interpreter: Send {
    fn inputs(&self) -> Vec<TensorDescriptor>;

    fn outputs(&self) -> Vec<TensorDescriptor>;

    /// Copy `inputs` into the input tensors, run the forward pass and copy the output tensors
    /// into `outputs`. Both slices are ordered and sized like the descriptors.
    fn invoke(&mut self, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> anyhow::Result<()>;
}

pub trait Engine: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Check that the native engine is linked and usable. Called once on installation.
    fn verify(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether this engine can create the delegate at all on the current platform.
    fn supports(&self, delegate: ComputeDelegate) -> bool;

    /// Compile the model and allocate its tensors. The bytes stay owned by the engine for as
    /// long as the interpreter lives.
    fn compile(
        &self,
        model: Vec<u8>,
        delegate: ComputeDelegate,
    ) -> Result<Box<dyn Interpreter>, CompileError>;
}

static ENGINE: OnceCell<Arc<dyn Engine>> = OnceCell::new();

/// Install the process-wide engine. Idempotent: once an engine is installed, later calls
/// succeed without probing and keep the first engine.
pub fn ensure_engine_installed(engine: Arc<dyn Engine>) -> Result<(), InstallError> {
    if let Some(installed) = ENGINE.get() {
        print_debug!("Engine \"{}\" is already installed", installed.name());
        return Ok(());
    }

    print_info!("Installing inference engine \"{}\"...", engine.name());
    engine.verify().map_err(|reason| {
        print_err!("Failed to install inference engine \"{}\"!", engine.name());
        InstallError::VerifyFailed {
            engine: engine.name().to_string(),
            reason,
        }
    })?;

    let installed = ENGINE.get_or_init(|| engine);
    print_info!("Successfully installed \"{}\"!", installed.name());
    Ok(())
}

/// The engine installed by [`ensure_engine_installed`].
pub fn installed_engine() -> Result<Arc<dyn Engine>, EngineNotAvailableError> {
    ENGINE.get().cloned().ok_or(EngineNotAvailableError)
}

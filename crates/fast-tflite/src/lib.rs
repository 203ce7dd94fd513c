//! On-device TensorFlow Lite inference core.
//!
//! This crate manages the lifecycle of compiled models and calls them from camera frame callbacks:
//! * [`ModelLoader`] resolves a [`ModelSource`] to bytes and compiles them for a
//!   [`ComputeDelegate`], producing a [`ModelHandle`].
//! * [`ModelHandle`] exposes the model's [`TensorDescriptor`]s and runs inference, synchronously
//!   with [`ModelHandle::run_sync`] or on a background thread with [`ModelHandle::run`].
//! * [`ModelSlot`] publishes the loading state of a model to UI observers, latest request wins.
//! * [`FrameInvoker`] runs the loaded model once per frame without ever blocking on a load.
//!
//! The inference engine itself sits behind the [`Engine`] trait and is installed once per process
//! with [`ensure_engine_installed`].
//!
//! ```no_run
//! # fn demo(engine: std::sync::Arc<dyn fast_tflite::Engine>) -> anyhow::Result<()> {
//! use fast_tflite::*;
//!
//! ensure_engine_installed(engine)?;
//! let loader = ModelLoader::from_installed()?;
//! let model = loader.load(&ModelSource::uri("file:///data/detector.tflite"), ComputeDelegate::Default)?;
//!
//! let image = vec![0f32; 320 * 320 * 3];
//! let outputs = model.run_sync(&[as_bytes(&image)])?;
//! let scores: Vec<f32> = to_values(&outputs[0]);
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod delegate;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod model;
pub mod source;
pub mod tensor;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, RuntimeConfig};
pub use delegate::ComputeDelegate;
pub use emitter::{ChannelEmitter, Delivery, Emitter, ResultLog};
pub use engine::{CompileError, Engine, Interpreter, ensure_engine_installed, installed_engine};
pub use error::{
    EngineNotAvailableError, InferenceError, InstallError, InvalidDelegateError,
    InvalidSourceError, LoadError,
};
pub use frame::{FrameConverter, FrameInvoker, FrameOutcome, FrameResult, SkipReason};
pub use lifecycle::{LifecycleState, ModelSlot, SUBSCRIBER_BACKLOG};
pub use loader::{LoadJob, ModelLoader};
pub use model::{ModelHandle, OutputBuffers, PendingInference};
pub use source::{
    AssetId, AssetResolver, ByteFetcher, DefaultFetcher, ModelSource, NoAssetResolver,
    ResolvedSource, SizeLimitExceeded, StaticAssetResolver, parse_uri,
};
pub use tensor::{ElementType, TensorDescriptor, as_bytes, to_values};

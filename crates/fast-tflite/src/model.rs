use crate::delegate::ComputeDelegate;
use crate::engine::Interpreter;
use crate::error::InferenceError;
use crate::print_debug;
use crate::tensor::TensorDescriptor;
use derive_more::Deref;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;

/// A loaded, ready-to-run model.
///
/// Cloning is cheap: all clones share the same interpreter. Descriptors can be read from any
/// thread at any time, while inference enters the interpreter exclusively. Concurrent calls to
/// [`run_sync`](Self::run_sync) and [`run`](Self::run) on the same model block and execute one
/// after the other; they are never interleaved or dropped.
///
/// The interpreter is released when the last clone is dropped. Every inference call borrows a
/// clone and holds the interpreter lock for its whole duration, so the model is never destroyed
/// mid-inference.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    label: String,
    delegate: ComputeDelegate,
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
    interpreter: Mutex<Box<dyn Interpreter>>,
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        print_debug!("Releasing model \"{}\"", self.label);
    }
}

impl ModelHandle {
    /// Wrap a compiled interpreter. Its descriptors are read once here and never again.
    pub fn from_interpreter(
        interpreter: Box<dyn Interpreter>,
        delegate: ComputeDelegate,
        label: impl Into<String>,
    ) -> Self {
        let inputs = interpreter.inputs();
        let outputs = interpreter.outputs();
        Self {
            inner: Arc::new(ModelInner {
                label: label.into(),
                delegate,
                inputs,
                outputs,
                interpreter: Mutex::new(interpreter),
            }),
        }
    }

    /// The computation delegate used by this model.
    pub fn delegate(&self) -> ComputeDelegate {
        self.inner.delegate
    }

    /// All input tensors of this model.
    pub fn inputs(&self) -> &[TensorDescriptor] {
        &self.inner.inputs
    }

    /// All output tensors of this model.
    /// The caller is responsible for correctly interpreting this data.
    pub fn outputs(&self) -> &[TensorDescriptor] {
        &self.inner.outputs
    }

    pub fn input(&self, name: &str) -> Option<&TensorDescriptor> {
        self.inner.inputs.iter().find(|t| t.name() == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.inner.outputs.iter().find(|t| t.name() == name)
    }

    /// Where the model was loaded from.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether both handles share the same interpreter.
    pub fn ptr_eq(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the model synchronously on the calling thread.
    ///
    /// Blocks while another inference is running on this model, then for the whole forward pass.
    /// The latency is therefore not bounded by this crate.
    pub fn run_sync(&self, inputs: &[&[u8]]) -> Result<Vec<Vec<u8>>, InferenceError> {
        self.validate_inputs(inputs)?;
        let mut outputs = OutputBuffers::for_handle(self)?;
        let mut interpreter = self.inner.interpreter.lock()?;
        self.invoke(interpreter.as_mut(), inputs, &mut outputs)?;
        Ok(outputs.into_inner())
    }

    /// Like [`run_sync`](Self::run_sync) but writes into caller-owned buffers that are reused
    /// across calls. The buffers are resized when they do not match this model.
    pub fn run_sync_into(
        &self,
        inputs: &[&[u8]],
        outputs: &mut OutputBuffers,
    ) -> Result<(), InferenceError> {
        self.validate_inputs(inputs)?;
        outputs.fit(self)?;
        let mut interpreter = self.inner.interpreter.lock()?;
        self.invoke(interpreter.as_mut(), inputs, outputs)
    }

    /// Like [`run_sync`](Self::run_sync) but fails with [`InferenceError::Busy`] instead of
    /// waiting when another inference holds the model.
    pub fn try_run_sync(&self, inputs: &[&[u8]]) -> Result<Vec<Vec<u8>>, InferenceError> {
        self.validate_inputs(inputs)?;
        let mut outputs = OutputBuffers::for_handle(self)?;
        let mut interpreter = match self.inner.interpreter.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(InferenceError::Busy),
            Err(TryLockError::Poisoned(e)) => return Err(e.into()),
        };
        self.invoke(interpreter.as_mut(), inputs, &mut outputs)?;
        Ok(outputs.into_inner())
    }

    /// Run the model on a background thread.
    ///
    /// Inputs are validated on the calling thread before anything is spawned. Concurrent jobs
    /// on the same model are mutually exclusive, but their completion order is unspecified.
    pub fn run(&self, inputs: Vec<Vec<u8>>) -> Result<PendingInference, InferenceError> {
        let borrowed = inputs.iter().map(Vec::as_slice).collect::<Vec<_>>();
        self.validate_inputs(&borrowed)?;

        let model = self.clone();
        let join = std::thread::Builder::new()
            .name("tflite-inference".to_string())
            .spawn(move || {
                let inputs = inputs.iter().map(Vec::as_slice).collect::<Vec<_>>();
                model.run_sync(&inputs)
            })
            .map_err(|e| InferenceError::Engine(e.into()))?;
        Ok(PendingInference { join: Some(join) })
    }

    fn validate_inputs(&self, inputs: &[&[u8]]) -> Result<(), InferenceError> {
        let expected = self.inputs();
        if inputs.len() != expected.len() {
            return Err(InferenceError::Arity {
                expected: expected.len(),
                actual: inputs.len(),
            });
        }
        for (index, (tensor, buffer)) in expected.iter().zip(inputs).enumerate() {
            let size = tensor
                .byte_len()
                .ok_or_else(|| InferenceError::UnsupportedElementType(tensor.name().to_string()))?;
            if buffer.len() != size {
                return Err(InferenceError::ShapeMismatch {
                    index,
                    name: tensor.name().to_string(),
                    expected: size,
                    actual: buffer.len(),
                });
            }
        }
        Ok(())
    }

    fn invoke(
        &self,
        interpreter: &mut dyn Interpreter,
        inputs: &[&[u8]],
        outputs: &mut OutputBuffers,
    ) -> Result<(), InferenceError> {
        interpreter
            .invoke(inputs, &mut outputs.0)
            .map_err(InferenceError::Engine)?;

        for (tensor, buffer) in self.outputs().iter().zip(outputs.iter()) {
            let expected = tensor.byte_len().unwrap_or_default();
            if buffer.len() != expected {
                return Err(InferenceError::OutputMismatch {
                    name: tensor.name().to_string(),
                    expected,
                    actual: buffer.len(),
                });
            }
        }
        Ok(())
    }
}

impl Debug for ModelHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("label", &self.inner.label)
            .field("delegate", &self.inner.delegate)
            .field("inputs", &self.inner.inputs)
            .field("outputs", &self.inner.outputs)
            .finish()
    }
}

/// Output buffers sized after a model's output descriptors, one per output tensor.
#[derive(Debug, Default, Deref)]
pub struct OutputBuffers(Vec<Vec<u8>>);

impl OutputBuffers {
    pub fn for_handle(model: &ModelHandle) -> Result<Self, InferenceError> {
        let mut buffers = Self::default();
        buffers.fit(model)?;
        Ok(buffers)
    }

    fn fit(&mut self, model: &ModelHandle) -> Result<(), InferenceError> {
        let outputs = model.outputs();
        self.0.resize_with(outputs.len(), Vec::new);
        for (tensor, buffer) in outputs.iter().zip(self.0.iter_mut()) {
            let size = tensor
                .byte_len()
                .ok_or_else(|| InferenceError::UnsupportedElementType(tensor.name().to_string()))?;
            buffer.resize(size, 0);
        }
        Ok(())
    }

    pub fn into_inner(self) -> Vec<Vec<u8>> {
        self.0
    }
}

/// An inference running on a background thread.
pub struct PendingInference {
    join: Option<JoinHandle<Result<Vec<Vec<u8>>, InferenceError>>>,
}

impl PendingInference {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Block until the outputs are available.
    pub fn wait(mut self) -> Result<Vec<Vec<u8>>, InferenceError> {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|e| {
                Err(InferenceError::ThreadPanicked(format!(
                    "Inference thread panicked: {e:?}"
                )))
            }),
            None => Err(InferenceError::ThreadPanicked(
                "Inference result was already taken".to_string(),
            )),
        }
    }
}

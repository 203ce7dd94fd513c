//! Per-frame inference from a camera frame callback.
//!
//! [`FrameInvoker::on_frame`] is called on the frame thread. It never loads anything, never
//! blocks on observers and never fails: frames that cannot be processed are skipped and the
//! reason is returned, so the pipeline's own policy decides what happens next.

use crate::config::RuntimeConfig;
use crate::emitter::{ChannelEmitter, Emitter};
use crate::lifecycle::ModelSlot;
use crate::model::{ModelHandle, OutputBuffers};
use crate::tensor::TensorDescriptor;
use crate::{print_debug, print_warn};
use crossbeam::channel::Receiver;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Converts a frame into one byte buffer per model input.
///
/// The buffers are sized after the descriptors before every call and are reused across frames.
pub trait FrameConverter<F> {
    fn convert(
        &mut self,
        frame: &F,
        inputs: &[TensorDescriptor],
        buffers: &mut [Vec<u8>],
    ) -> anyhow::Result<()>;
}

impl<F, T> FrameConverter<F> for T
where
    T: FnMut(&F, &[TensorDescriptor], &mut [Vec<u8>]) -> anyhow::Result<()>,
{
    fn convert(
        &mut self,
        frame: &F,
        inputs: &[TensorDescriptor],
        buffers: &mut [Vec<u8>],
    ) -> anyhow::Result<()> {
        self(frame, inputs, buffers)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The slot has no loaded model yet, or its last load failed.
    NotLoaded,
    ConversionFailed,
    /// The model rejected the inputs or the engine failed.
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Completed { latency: Duration },
    Skipped(SkipReason),
}

/// Outputs of one processed frame, delivered to observers through an [`Emitter`].
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub frame_index: u64,
    pub outputs: Vec<Vec<u8>>,
    pub latency: Duration,
}

pub struct FrameInvoker<F, C> {
    slot: ModelSlot,
    converter: C,
    emitter: Option<Arc<dyn Emitter<FrameResult>>>,
    current: Option<ModelHandle>,
    inputs: Vec<Vec<u8>>,
    outputs: OutputBuffers,
    frame_index: u64,
    dropped_results: u64,
    _frame: PhantomData<fn(&F)>,
}

impl<F, C: FrameConverter<F>> FrameInvoker<F, C> {
    pub fn new(slot: ModelSlot, converter: C) -> Self {
        Self {
            slot,
            converter,
            emitter: None,
            current: None,
            inputs: Vec::new(),
            outputs: OutputBuffers::default(),
            frame_index: 0,
            dropped_results: 0,
            _frame: PhantomData,
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn Emitter<FrameResult>>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Deliver results through a bounded channel. Results are dropped while it is full.
    pub fn with_result_channel(self, capacity: usize) -> (Self, Receiver<FrameResult>) {
        let (emitter, rx) = ChannelEmitter::bounded(capacity);
        (self.with_emitter(Arc::new(emitter)), rx)
    }

    /// [`with_result_channel`](Self::with_result_channel) sized by `result_channel_capacity`.
    pub fn with_config(self, config: &RuntimeConfig) -> (Self, Receiver<FrameResult>) {
        self.with_result_channel(config.result_channel_capacity)
    }

    /// Outputs of the last completed frame.
    pub fn outputs(&self) -> &OutputBuffers {
        &self.outputs
    }

    /// Number of frames seen so far, processed or not.
    pub fn frames(&self) -> u64 {
        self.frame_index
    }

    /// Completed frames whose result the emitter could not deliver.
    pub fn dropped_results(&self) -> u64 {
        self.dropped_results
    }

    pub fn on_frame(&mut self, frame: &F) -> FrameOutcome {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let state = self.slot.state();
        let Some(model) = state.model() else {
            return FrameOutcome::Skipped(SkipReason::NotLoaded);
        };

        if !self.current.as_ref().is_some_and(|m| m.ptr_eq(model)) {
            if let Err(e) = self.prepare(model) {
                print_warn!("Frame {frame_index}: cannot allocate buffers for {model:?}: {e}");
                self.current = None;
                return FrameOutcome::Skipped(SkipReason::Failed);
            }
        }

        // Converters may resize the buffers; every frame starts from the descriptor sizes.
        for (tensor, buffer) in model.inputs().iter().zip(self.inputs.iter_mut()) {
            buffer.resize(tensor.byte_len().unwrap_or_default(), 0);
        }
        if let Err(e) = self
            .converter
            .convert(frame, model.inputs(), &mut self.inputs)
        {
            print_warn!("Frame {frame_index}: failed to convert frame: {e}");
            return FrameOutcome::Skipped(SkipReason::ConversionFailed);
        }

        let inputs = self.inputs.iter().map(Vec::as_slice).collect::<Vec<_>>();
        let start = Instant::now();
        if let Err(e) = model.run_sync_into(&inputs, &mut self.outputs) {
            print_warn!("Frame {frame_index}: inference failed: {e}");
            return FrameOutcome::Skipped(SkipReason::Failed);
        }
        let latency = start.elapsed();

        if let Some(emitter) = &self.emitter {
            let result = FrameResult {
                frame_index,
                outputs: self.outputs.to_vec(),
                latency,
            };
            let delivery = emitter.emit(result);
            if !delivery.is_delivered() {
                self.dropped_results += 1;
                print_debug!("Frame {frame_index}: result dropped ({delivery:?})");
            }
        }

        FrameOutcome::Completed { latency }
    }

    fn prepare(&mut self, model: &ModelHandle) -> Result<(), crate::InferenceError> {
        self.outputs = OutputBuffers::for_handle(model)?;
        self.inputs = model
            .inputs()
            .iter()
            .map(|t| {
                t.byte_len()
                    .map(|len| vec![0u8; len])
                    .ok_or_else(|| crate::InferenceError::UnsupportedElementType(t.name().into()))
            })
            .collect::<Result<_, _>>()?;
        self.current = Some(model.clone());
        Ok(())
    }
}

//! Deterministic stand-ins for the native engine and the byte-source collaborators.
//!
//! A test "model" is a JSON manifest listing its tensors, the delegates it supports and how long a
//! forward pass takes. Outputs are SHA-256 digests of the copied-in input tensors, so identical
//! inputs give identical outputs and any interleaving between two calls shows up as a wrong
//! digest.

use crate::delegate::ComputeDelegate;
use crate::engine::{CompileError, Engine, Interpreter};
use crate::source::{AssetId, AssetResolver, ByteFetcher, ResolvedSource};
use crate::tensor::{ElementType, TensorDescriptor};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestModel {
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
    delegates: Vec<ComputeDelegate>,
    delay_ms: u64,
}

impl TestModel {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            delegates: vec![ComputeDelegate::Default],
            delay_ms: 0,
        }
    }

    /// One `float32[1,320,320,3]` input and one `float32[1,10]` output.
    pub fn detector() -> Self {
        Self::new()
            .input("image", ElementType::Float32, &[1, 320, 320, 3])
            .output("scores", ElementType::Float32, &[1, 10])
    }

    pub fn input(mut self, name: &str, ty: ElementType, shape: &[usize]) -> Self {
        self.inputs
            .push(TensorDescriptor::new(name, ty, shape.to_vec()));
        self
    }

    pub fn output(mut self, name: &str, ty: ElementType, shape: &[usize]) -> Self {
        self.outputs
            .push(TensorDescriptor::new(name, ty, shape.to_vec()));
        self
    }

    pub fn delegates(mut self, delegates: &[ComputeDelegate]) -> Self {
        self.delegates = delegates.to_vec();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("manifest serializes")
    }

    pub fn outputs(&self) -> &[TensorDescriptor] {
        &self.outputs
    }
}

/// What the test engine computes for `inputs`, without going through an interpreter.
pub fn expected_outputs(outputs: &[TensorDescriptor], inputs: &[&[u8]]) -> Vec<Vec<u8>> {
    outputs
        .iter()
        .enumerate()
        .map(|(index, tensor)| {
            let mut out = vec![0u8; tensor.byte_len().unwrap_or(0)];
            fill_digest(index, inputs.iter().copied(), &mut out);
            out
        })
        .collect()
}

fn fill_digest<'a>(seed: usize, state: impl Iterator<Item = &'a [u8]>, out: &mut [u8]) {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    for tensor in state {
        hasher.update(tensor);
    }
    let mut block = hasher.finalize();
    for chunk in out.chunks_mut(block.len()) {
        chunk.copy_from_slice(&block[..chunk.len()]);
        block = Sha256::digest(block);
    }
}

pub struct TestEngine {
    supported: Vec<ComputeDelegate>,
    compiles: AtomicUsize,
    live: Arc<AtomicUsize>,
    hold: Arc<Mutex<Option<InvokeHold>>>,
}

struct InvokeHold {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl TestEngine {
    pub const NAME: &'static str = "test-engine";

    /// An engine built with every delegate available.
    pub fn new() -> Self {
        Self::with_delegates(&[
            ComputeDelegate::Default,
            ComputeDelegate::Metal,
            ComputeDelegate::CoreMl,
            ComputeDelegate::AndroidGpu,
            ComputeDelegate::NnApi,
        ])
    }

    pub fn with_delegates(delegates: &[ComputeDelegate]) -> Self {
        Self {
            supported: delegates.to_vec(),
            compiles: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            hold: Arc::new(Mutex::new(None)),
        }
    }

    /// Successful compilations so far.
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Interpreters compiled by this engine that have not been dropped yet.
    pub fn live_interpreters(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Park the next `invoke` of any interpreter of this engine. The first receiver fires once
    /// the interpreter is entered; the invocation continues when the sender sends.
    pub fn hold_next_invoke(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam::channel::bounded(1);
        let (release_tx, release_rx) = crossbeam::channel::bounded(1);
        *self.hold.lock().unwrap() = Some(InvokeHold {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

impl Engine for TestEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, delegate: ComputeDelegate) -> bool {
        self.supported.contains(&delegate)
    }

    fn compile(
        &self,
        model: Vec<u8>,
        delegate: ComputeDelegate,
    ) -> Result<Box<dyn Interpreter>, CompileError> {
        let manifest: TestModel = serde_json::from_slice(&model)
            .map_err(|e| CompileError::InvalidModel(e.into()))?;
        if !manifest.delegates.contains(&delegate) {
            return Err(CompileError::DelegateIncompatible(delegate));
        }
        let tensors = manifest
            .inputs
            .iter()
            .map(|t| {
                t.byte_len()
                    .map(|len| vec![0u8; len])
                    .context("input tensor without a fixed width")
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(CompileError::Allocation)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.compiles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestInterpreter {
            manifest,
            tensors,
            live: self.live.clone(),
            hold: self.hold.clone(),
        }))
    }
}

struct TestInterpreter {
    manifest: TestModel,
    tensors: Vec<Vec<u8>>,
    live: Arc<AtomicUsize>,
    hold: Arc<Mutex<Option<InvokeHold>>>,
}

impl Drop for TestInterpreter {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Interpreter for TestInterpreter {
    fn inputs(&self) -> Vec<TensorDescriptor> {
        self.manifest.inputs.clone()
    }

    fn outputs(&self) -> Vec<TensorDescriptor> {
        self.manifest.outputs.clone()
    }

    fn invoke(&mut self, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> anyhow::Result<()> {
        for (tensor, input) in self.tensors.iter_mut().zip(inputs) {
            tensor.copy_from_slice(input);
        }
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.entered.send(());
            let _ = hold.release.recv();
        }
        if self.manifest.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.manifest.delay_ms));
        }
        for (index, out) in outputs.iter_mut().enumerate() {
            fill_digest(index, self.tensors.iter().map(Vec::as_slice), out);
        }
        Ok(())
    }
}

/// In-memory byte source keyed by URI, counting every fetch. URIs can be gated so that their
/// fetch blocks until the test releases it.
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, uri: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(uri.to_string(), bytes);
        self
    }

    /// Block fetches of `uri` until the returned sender sends (or is dropped).
    pub fn gate(&self, uri: &str) -> Sender<()> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.gates.lock().unwrap().insert(uri.to_string(), rx);
        tx
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ByteFetcher for MemoryFetcher {
    fn fetch(&self, source: &ResolvedSource, _limit: Option<u64>) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let uri = source.to_string();
        let gate = self.gates.lock().unwrap().remove(&uri);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.files
            .lock()
            .unwrap()
            .get(&uri)
            .cloned()
            .with_context(|| format!("404 Not Found: {uri}"))
    }
}

/// Resolver that counts lookups and maps every asset to `http://assets.test/<id>.tflite`.
#[derive(Default)]
pub struct CountingResolver {
    lookups: AtomicUsize,
}

impl CountingResolver {
    pub fn uri_for(asset: AssetId) -> String {
        format!("http://assets.test/{}.tflite", asset.0)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl AssetResolver for CountingResolver {
    fn resolve(&self, asset: AssetId) -> anyhow::Result<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Self::uri_for(asset))
    }
}

/// Fetcher whose every fetch panics, as a broken native I/O layer would.
pub struct PanickingFetcher;

impl ByteFetcher for PanickingFetcher {
    fn fetch(&self, source: &ResolvedSource, _limit: Option<u64>) -> anyhow::Result<Vec<u8>> {
        panic!("fetcher blew up while reading {source}")
    }
}

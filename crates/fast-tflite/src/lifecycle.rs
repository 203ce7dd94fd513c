//! Observable loading state of a logical model slot.
//!
//! A [`ModelSlot`] starts out [`Loading`](LifecycleState::Loading) and moves to
//! [`Loaded`](LifecycleState::Loaded) or [`Error`](LifecycleState::Error) once a load finishes.
//! Every [`request`](ModelSlot::request) bumps the slot's generation; results of older
//! generations are discarded when they arrive, so the slot always settles on the latest request.

use crate::delegate::ComputeDelegate;
use crate::error::LoadError;
use crate::loader::ModelLoader;
use crate::model::ModelHandle;
use crate::source::ModelSource;
use crate::{print_debug, print_err};
use crossbeam::channel::{Receiver, Sender};
use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Publishes a subscriber may leave unread before it is unsubscribed.
pub const SUBSCRIBER_BACKLOG: usize = 16;

#[derive(Clone, Debug)]
pub enum LifecycleState {
    Loading,
    Loaded(ModelHandle),
    Error { message: String },
}

impl LifecycleState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LifecycleState::Loading)
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        match self {
            LifecycleState::Loaded(model) => Some(model),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LifecycleState::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Loading => write!(f, "loading"),
            LifecycleState::Loaded(_) => write!(f, "loaded"),
            LifecycleState::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// One logical model slot, typically owned by a UI component.
///
/// Cloning gives another handle to the same slot.
#[derive(Clone)]
pub struct ModelSlot {
    inner: Arc<SlotInner>,
}

struct SlotInner {
    loader: ModelLoader,
    published: Mutex<Published>,
    settled: Condvar,
    subscribers: Mutex<Vec<Sender<LifecycleState>>>,
}

struct Published {
    generation: u64,
    state: LifecycleState,
    last_request: Option<(ModelSource, ComputeDelegate)>,
}

impl ModelSlot {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                loader,
                published: Mutex::new(Published {
                    generation: 0,
                    state: LifecycleState::Loading,
                    last_request: None,
                }),
                settled: Condvar::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start loading `source` and return the generation of this request.
    ///
    /// `Loading` is published right away, releasing the slot's previous model. Whatever the load
    /// produces is published later, unless another request was made in the meantime.
    pub fn request(&self, source: ModelSource, delegate: ComputeDelegate) -> u64 {
        let generation = {
            let mut published = self.inner.lock();
            published.generation += 1;
            published.last_request = Some((source.clone(), delegate));
            self.inner.publish(&mut published, LifecycleState::Loading);
            published.generation
        };

        let slot = Arc::downgrade(&self.inner);
        let loader = self.inner.loader.clone();
        std::thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| loader.load(&source, delegate)))
                .unwrap_or_else(|panic| {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic payload".to_string());
                    Err(LoadError::ThreadPanicked(reason))
                });
            let state = match result {
                Ok(model) => LifecycleState::Loaded(model),
                Err(e) => {
                    print_err!("Failed to load model from {source}: {e}");
                    LifecycleState::Error {
                        message: e.to_string(),
                    }
                }
            };
            SlotInner::complete(slot, generation, state);
        });

        generation
    }

    /// Request a load only if `source` or `delegate` differ from the last request.
    pub fn update(&self, source: ModelSource, delegate: ComputeDelegate) -> Option<u64> {
        {
            let published = self.inner.lock();
            if published
                .last_request
                .as_ref()
                .is_some_and(|(s, d)| *s == source && *d == delegate)
            {
                return None;
            }
        }
        Some(self.request(source, delegate))
    }

    /// [`request`](Self::request) with the loader's default delegate.
    pub fn request_default(&self, source: ModelSource) -> u64 {
        self.request(source, self.inner.loader.default_delegate())
    }

    /// [`update`](Self::update) with the loader's default delegate.
    pub fn update_default(&self, source: ModelSource) -> Option<u64> {
        self.update(source, self.inner.loader.default_delegate())
    }

    /// The current state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state.clone()
    }

    /// The generation of the latest request, `0` before the first one.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Receive the current state, then every subsequent publish in order.
    ///
    /// Queued states keep their models alive. A subscriber that leaves more than
    /// [`SUBSCRIBER_BACKLOG`] states unread is unsubscribed; its receiver disconnects once drained.
    pub fn subscribe(&self) -> Receiver<LifecycleState> {
        let (tx, rx) = crossbeam::channel::unbounded();
        // Holding the state lock orders the snapshot before any later publish.
        let published = self.inner.lock();
        let _ = tx.send(published.state.clone());
        self.inner.subscribers().push(tx);
        drop(published);
        rx
    }

    /// Block until the slot is no longer loading, or until `timeout` passes.
    pub fn wait_settled(&self, timeout: Duration) -> LifecycleState {
        let deadline = Instant::now() + timeout;
        let mut published = self.inner.lock();
        while published.state.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            published = match self.inner.settled.wait_timeout(published, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        published.state.clone()
    }
}

impl SlotInner {
    // A panic while publishing cannot leave `Published` half-written, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Published> {
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Sender<LifecycleState>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, published: &mut Published, state: LifecycleState) {
        published.state = state;
        self.subscribers().retain(|tx| {
            if tx.len() >= SUBSCRIBER_BACKLOG {
                print_debug!("Dropping a model state subscriber with {} unread states", tx.len());
                return false;
            }
            tx.send(published.state.clone()).is_ok()
        });
        if !published.state.is_loading() {
            self.settled.notify_all();
        }
    }

    fn complete(slot: Weak<SlotInner>, generation: u64, state: LifecycleState) {
        let Some(slot) = slot.upgrade() else {
            print_debug!("Model slot was dropped before generation {generation} finished loading");
            return;
        };
        let mut published = slot.lock();
        if published.generation != generation {
            print_debug!(
                "Discarding stale load result of generation {generation} (current is {})",
                published.generation
            );
            return;
        }
        slot.publish(&mut published, state);
    }
}

//! Delivery of per-frame results to observers.
//!
//! The frame thread hands every result to an [`Emitter`] and moves on. An emitter never waits for
//! its observer: a result that cannot be delivered right away is dropped, and the caller learns
//! about it from the returned [`Delivery`].

use crossbeam::channel::{Receiver, Sender, TrySendError};
use std::sync::Mutex;

/// What happened to an emitted result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The observer is behind; the result was dropped.
    Full,
    /// The observer is gone; the result was dropped.
    Closed,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

pub trait Emitter<T>: Send + Sync + 'static {
    fn emit(&self, item: T) -> Delivery;
}

/// Keeps every result in memory until the host drains it.
pub struct ResultLog<T> {
    items: Mutex<Vec<T>>,
}

impl<T> ResultLog<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all results logged so far, oldest first.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items())
    }

    // Pushing a result cannot leave the vector half-written, so poisoning is ignored.
    fn items(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for ResultLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Emitter<T> for ResultLog<T> {
    fn emit(&self, item: T) -> Delivery {
        self.items().push(item);
        Delivery::Delivered
    }
}

/// Hands results to a bounded crossbeam channel, dropping them while the channel is full.
pub struct ChannelEmitter<T> {
    tx: Sender<T>,
}

impl<T: Send + 'static> ChannelEmitter<T> {
    /// An emitter and its receiving end, holding at most `capacity` undelivered results.
    pub fn bounded(capacity: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl<T: Send + 'static> Emitter<T> for ChannelEmitter<T> {
    fn emit(&self, item: T) -> Delivery {
        match self.tx.try_send(item) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }
}

//! In-process delivery of committed events (tests, dev, reporting threads).
//!
//! Every subscriber owns a bounded queue. A subscriber that stops draining is
//! disconnected once its queue fills up instead of stalling the writer that
//! just committed; it can rebuild what it missed from the movement log.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::bus::{EventBus, Subscription};

/// Per-subscriber queue length used by [`InMemoryEventBus::new`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// Subscribers cut off during this publish because their queue was full.
    Lagging { disconnected: usize },
}

#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    capacity: usize,
    queues: Mutex<Vec<SyncSender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(Vec::new()),
        }
    }

    // Pushing to a queue cannot leave the list half-updated.
    fn queues(&self) -> MutexGuard<'_, Vec<SyncSender<M>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut lagging = 0;
        self.queues().retain(|queue| match queue.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                lagging += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if lagging > 0 {
            return Err(InMemoryBusError::Lagging { disconnected: lagging });
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (queue, receiver) = mpsc::sync_channel(self.capacity);
        self.queues().push(queue);
        Subscription::new(receiver)
    }
}

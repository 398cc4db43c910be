//! Bounded FIFO queue between the HTTP handlers and the worker pool.
//!
//! Producers use [`EventQueue::try_enqueue`], which never waits: a full or
//! closed queue rejects the event immediately so overload turns into a 503
//! instead of a stalled request. Workers use [`EventQueue::dequeue`], which
//! waits for the next event and returns `None` once the queue has been closed
//! and every buffered event has been handed out.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Returned when an event could not be admitted. The event is handed back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError<T> {
    #[error("queue is full")]
    Full(T),

    #[error("queue is closed")]
    Closed(T),
}

impl<T> EnqueueError<T> {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Full(event) | Self::Closed(event) => event,
        }
    }
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> EventQueue<T> {
    /// Creates a queue holding at most `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Appends `event` if there is room, without waiting.
    pub fn try_enqueue(&self, event: T) -> Result<(), EnqueueError<T>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(EnqueueError::Closed(event));
            }
            if state.buffer.len() >= self.capacity {
                return Err(EnqueueError::Full(event));
            }
            state.buffer.push_back(event);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends `event`, waiting for room if the queue is full.
    ///
    /// Resolves to [`EnqueueError::Closed`] if the queue is closed before the
    /// event could be admitted.
    pub async fn enqueue(&self, mut event: T) -> Result<(), EnqueueError<T>> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            // Register before checking so a close or dequeue between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            match self.try_enqueue(event) {
                Err(EnqueueError::Full(rejected)) => event = rejected,
                result => return result,
            }

            notified.await;
        }
    }

    /// Removes the oldest event, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty. Cancel safe: an
    /// event is only removed in the same poll that returns it.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(event) = state.buffer.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops admitting events and wakes every waiter.
    ///
    /// Already buffered events stay available to `dequeue`. Calling `close`
    /// more than once has no further effect.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // No user code runs under this lock, so a poisoned guard is still sound.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

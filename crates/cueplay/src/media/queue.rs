//! Fixed-capacity blocking FIFO shared by the decode pump and one consumer.
//!
//! Backpressure is the only flow control: `push` blocks while the queue is
//! full and never drops. Every flush bumps a generation counter; a producer
//! that was blocked with a frame decoded before the flush gets
//! `PushError::Stale` instead of slipping the old frame in afterwards, and a
//! consumer can tell whether the frame it holds predates the last flush.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Default queue depth for both audio and video.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The queue was flushed after the caller sampled its generation.
    Stale,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// An item taken from the queue together with the generation it belonged to.
#[derive(Debug)]
pub struct Popped<T> {
    pub item: T,
    pub generation: u64,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    generation: u64,
    closed: bool,
}

pub struct BoundedFrameQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedFrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                generation: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Occupancy as a whole percentage of capacity (0..=100).
    pub fn fill_percent(&self) -> u8 {
        let len = self.len();
        ((len * 100) / self.capacity).min(100) as u8
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Whether an item popped under `generation` is still valid.
    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// `generation` must have been sampled before the item was produced.
    pub fn push(&self, item: T, generation: u64) -> Result<(), PushError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PushError::Closed);
            }
            if inner.generation != generation {
                return Err(PushError::Stale);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                drop(inner);
                // Both the consumer and a seek waiting for the fill threshold may be parked.
                self.not_empty.notify_all();
                return Ok(());
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Popped<T>>, QueueClosed> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            if let Some(item) = inner.items.pop_front() {
                let generation = inner.generation;
                drop(inner);
                self.not_full.notify_one();
                return Ok(Some(Popped { item, generation }));
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() && inner.items.is_empty() {
                return if inner.closed { Err(QueueClosed) } else { Ok(None) };
            }
        }
    }

    pub fn try_pop(&self) -> Option<Popped<T>> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        let generation = inner.generation;
        drop(inner);
        self.not_full.notify_one();
        Some(Popped { item, generation })
    }

    /// Inspect the head without removing it.
    pub fn peek_map<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().items.front().map(f)
    }

    /// Block until at least `min` items are queued or `timeout` elapses.
    pub fn wait_for_len(&self, min: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.items.len() >= min {
                return true;
            }
            if inner.closed {
                return false;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return inner.items.len() >= min;
            }
        }
    }

    /// Discard every queued item and start a new generation.
    ///
    /// Producers blocked on a full queue wake up and receive `Stale`.
    pub fn clear(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.generation += 1;
        let generation = inner.generation;
        drop(inner);
        self.not_full.notify_all();
        generation
    }

    /// Wake every waiter and refuse further pushes and pops.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

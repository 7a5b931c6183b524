//! Bounded MPSC request queue: multiple producers (calling threads),
//! one consumer (the inference worker). Mutex + condvar; blocking pop,
//! non-blocking push, graceful shutdown that still drains queued items.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct QueueInner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

pub struct RequestQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
    /// 0 = unbounded.
    max_size: usize,
}

impl<T> RequestQueue<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            max_size,
        }
    }

    /// Non-blocking enqueue. Returns false when the queue is full or
    /// shut down.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return false;
        }
        if self.max_size > 0 && inner.items.len() >= self.max_size {
            return false;
        }
        inner.items.push_back(item);
        self.available.notify_one();
        true
    }

    /// Block until an item is available or shutdown. Returns `None` only
    /// when the queue is shut down and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    /// As `pop`, with an upper bound on the wait.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.available.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    /// Wake all waiters and refuse further pushes. Already-queued items
    /// remain deliverable.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().unwrap().shutdown
    }

    /// Drop all queued items (emergency cancellation).
    pub fn clear(&self) {
        self.inner.lock().unwrap().items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }
}

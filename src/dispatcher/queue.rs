use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

/// A bounded FIFO supporting mid-queue removal, built for the purge-on-skip
/// semantics a plain channel cannot offer. `push` applies backpressure by
/// waiting for space; `take` waits for an item.
pub struct BoundedDeque<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    space: Notify,
    items: Notify,
}

impl<T> BoundedDeque<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            space: Notify::new(),
            items: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `value`, waiting until the queue is below capacity.
    pub async fn push(&self, value: T) {
        let mut value = Some(value);
        loop {
            {
                let mut queue = self.inner.lock().await;
                if queue.len() < self.capacity {
                    if let Some(v) = value.take() {
                        queue.push_back(v);
                    }
                    self.items.notify_one();
                    return;
                }
            }
            // register before the re-check so a pop between the two cannot
            // be lost
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let queue = self.inner.lock().await;
                if queue.len() < self.capacity {
                    continue;
                }
            }
            notified.await;
        }
    }

    /// Removes the front item, waiting until one exists, and runs `observe`
    /// on it while the queue lock is still held.
    pub async fn take_and<F>(&self, mut observe: F) -> T
    where
        F: FnMut(&T),
    {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(value) = queue.pop_front() {
                    observe(&value);
                    self.space.notify_one();
                    return value;
                }
            }
            let notified = self.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let queue = self.inner.lock().await;
                if !queue.is_empty() {
                    continue;
                }
            }
            notified.await;
        }
    }

    pub async fn take(&self) -> T {
        self.take_and(|_| {}).await
    }

    pub async fn try_take(&self) -> Option<T> {
        let mut queue = self.inner.lock().await;
        let value = queue.pop_front();
        if value.is_some() {
            self.space.notify_one();
        }
        value
    }

    /// Drops every item for which `keep` returns false, returning the number
    /// removed. Pushers blocked on capacity are released.
    pub async fn retain<F>(&self, keep: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let mut queue = self.inner.lock().await;
        let before = queue.len();
        queue.retain(|item| keep(item));
        let removed = before - queue.len();
        if removed > 0 {
            self.space.notify_waiters();
        }
        removed
    }

    pub async fn clear(&self) -> usize {
        let mut queue = self.inner.lock().await;
        let removed = queue.len();
        queue.clear();
        if removed > 0 {
            self.space.notify_waiters();
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

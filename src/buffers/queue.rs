use std::{collections::VecDeque, time::Duration};

use async_mutex::Mutex;
use event_listener::Event;
use tokio::time::{timeout_at, Instant};

use super::Buffer;

/// A thread-safe FIFO of in-flight buffers.
///
/// Producers push filled buffers onto the back; the worker drains the whole
/// queue in one operation and iterates the returned chain privately, without
/// holding the lock. On a send failure the worker pushes the un-sent suffix
/// back onto the front, preserving head order.
///
/// Each push wakes one waiter; the timed pops wait on an absolute deadline
/// derived from `now + timeout` and return `None` once it expires.
pub(crate) struct BufferQueue {
    state: Mutex<VecDeque<Buffer>>,
    event: Event,
}

impl BufferQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(VecDeque::new()),
            event: Event::new(),
        }
    }

    /// Inserts a buffer at the head and returns the post-insert count.
    #[allow(unused)]
    pub(crate) async fn push_front(&self, buf: Buffer) -> usize {
        let mut state = self.state.lock().await;
        state.push_front(buf);
        let count = state.len();
        drop(state);
        self.event.notify(1);
        count
    }

    /// Inserts a chain at the head, preserving its internal order, and
    /// returns the post-insert count.
    pub(crate) async fn push_front_many(&self, mut chain: VecDeque<Buffer>) -> usize {
        let mut state = self.state.lock().await;
        while let Some(buf) = chain.pop_back() {
            state.push_front(buf);
        }
        let count = state.len();
        drop(state);
        self.event.notify(1);
        count
    }

    /// Appends a buffer at the tail and returns the post-insert count.
    ///
    /// The returned count is the spill-threshold input for the producer-side
    /// overflow check.
    pub(crate) async fn push_back(&self, buf: Buffer) -> usize {
        let mut state = self.state.lock().await;
        state.push_back(buf);
        let count = state.len();
        drop(state);
        self.event.notify(1);
        count
    }

    /// Appends a chain at the tail and returns the post-insert count.
    pub(crate) async fn push_back_many(&self, chain: VecDeque<Buffer>) -> usize {
        let mut state = self.state.lock().await;
        state.extend(chain);
        let count = state.len();
        drop(state);
        self.event.notify(1);
        count
    }

    /// Removes and returns the head buffer, or `None` if the queue is empty.
    pub(crate) async fn pop_front(&self) -> Option<Buffer> {
        self.state.lock().await.pop_front()
    }

    /// Removes and returns the head buffer, waiting up to `timeout` for one
    /// to arrive.
    #[allow(unused)]
    pub(crate) async fn pop_front_timeout(&self, timeout: Duration) -> Option<Buffer> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(buf) = self.pop_front().await {
                return Some(buf);
            }
            let listener = self.event.listen();
            // Re-check: a push may have landed between the lock release and
            // the listener registration.
            if let Some(buf) = self.pop_front().await {
                return Some(buf);
            }
            if timeout_at(deadline, listener).await.is_err() {
                return self.pop_front().await;
            }
        }
    }

    /// Atomically detaches the whole FIFO, or returns `None` if it is empty.
    ///
    /// This is the worker's primary entry point: the returned chain is
    /// private to the caller and can be iterated without the lock.
    pub(crate) async fn pop_all(&self) -> Option<VecDeque<Buffer>> {
        let mut state = self.state.lock().await;
        if state.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *state))
    }

    /// Atomically detaches the whole FIFO, waiting up to `timeout` for at
    /// least one buffer to arrive.
    pub(crate) async fn pop_all_timeout(&self, timeout: Duration) -> Option<VecDeque<Buffer>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(chain) = self.pop_all().await {
                return Some(chain);
            }
            let listener = self.event.listen();
            if let Some(chain) = self.pop_all().await {
                return Some(chain);
            }
            if timeout_at(deadline, listener).await.is_err() {
                return self.pop_all().await;
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}

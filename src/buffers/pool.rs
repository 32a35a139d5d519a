use async_mutex::Mutex;

use super::Buffer;

/// Number of buffers pre-allocated in one batch when the pool runs empty.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// A thread-safe free list of idle [`Buffer`]s.
///
/// The pool hands buffers out to producers and reclaims them from the worker
/// once their payload has been transmitted or spilled. It is a LIFO stack:
/// the most recently returned buffer — with its still-warm allocation — is
/// the next one handed out.
///
/// The pool refills itself in batches of `chunk_size` and never shrinks;
/// once created, a buffer belongs to the pool's population until the pool is
/// dropped.
pub struct BufferPool {
    free: Mutex<Vec<Buffer>>,
    chunk_size: usize,
}

impl BufferPool {
    /// Creates an empty pool with the default refill batch size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates an empty pool refilling `chunk_size` buffers at a time.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        Self {
            free: Mutex::new(Vec::new()),
            chunk_size,
        }
    }

    /// Takes an idle buffer off the top of the free list.
    ///
    /// An empty pool batch-allocates `chunk_size` fresh buffers first,
    /// tolerating partial success. `None` is returned only when not a single
    /// buffer could be added, which callers must treat as "drop the
    /// message".
    pub async fn get(&self) -> Option<Buffer> {
        let mut free = self.free.lock().await;
        if free.is_empty() && !Self::refill(&mut free, self.chunk_size) {
            return None;
        }
        free.pop()
    }

    /// Returns a buffer to the free list.
    ///
    /// The payload is not cleared; the next producer overwrites it via
    /// [`Buffer::fill`].
    pub async fn put(&self, buf: Buffer) {
        self.free.lock().await.push(buf);
    }

    fn refill(free: &mut Vec<Buffer>, chunk_size: usize) -> bool {
        let granted = match free.try_reserve(chunk_size) {
            Ok(()) => chunk_size,
            // Memory pressure: settle for a single buffer if we can.
            Err(_) => match free.try_reserve(1) {
                Ok(()) => 1,
                Err(_) => return false,
            },
        };
        free.extend((0..granted).map(|_| Buffer::default()));
        true
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

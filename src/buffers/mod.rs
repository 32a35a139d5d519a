//! Buffer management: the payload blob, the reuse pool, and the in-flight
//! queue.
//!
//! A [`Buffer`] is the unit of transmission: one opaque payload owned by
//! exactly one party at a time — the producer filling it, the queue, the
//! worker's private chain, or the [`BufferPool`] it came from. Buffers are
//! recycled through the pool so that steady-state traffic performs no
//! per-message allocation: [`Buffer::fill`] reuses whatever capacity the
//! buffer accumulated in previous rounds.

mod pool;
mod queue;

use std::{collections::TryReserveError, io, path::Path};

use tokio::{fs, io::AsyncWriteExt};

pub use pool::BufferPool;
pub(crate) use pool::DEFAULT_CHUNK_SIZE;
pub(crate) use queue::BufferQueue;

/// An owned payload blob, the unit of transmission.
///
/// Buffers are obtained from a [`BufferPool`], filled exactly once per round
/// trip, and handed to the sender. The payload is opaque: the sender never
/// inspects or frames it.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Replaces the buffer contents with a copy of `src`.
    ///
    /// The allocation is fallible: on error the buffer keeps its previous
    /// contents and should be returned to the pool. Capacity from previous
    /// fills is reused, so a recycled buffer filled with a payload no larger
    /// than before allocates nothing.
    pub fn fill(&mut self, src: &[u8]) -> Result<(), TryReserveError> {
        self.data.clear();
        self.data.try_reserve(src.len())?;
        self.data.extend_from_slice(src);
        Ok(())
    }

    /// Returns the payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes the payload to `path`, creating or truncating the file with
    /// mode 0644.
    ///
    /// A partially written file is unlinked before the error is reported, so
    /// the spill directory never holds truncated payloads.
    pub(crate) async fn save(&self, path: &Path) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        options.mode(0o644);

        let mut file = options.open(path).await?;
        match file.write_all(&self.data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(path).await;
                Err(e)
            }
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

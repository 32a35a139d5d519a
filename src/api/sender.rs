//! The store-and-forward sender: producer-facing handle, background worker
//! task, and their builder.
//!
//! This module provides the main [`Sender`] interface for handing payloads
//! to the background worker, and the [`SenderTask`] handle controlling the
//! worker's lifetime and timeouts.
//!
//! # Architecture
//!
//! - **[`Sender`]**: the user-facing handle. Pushes filled buffers onto the
//!   in-memory queue and spills the backlog to disk when the queue depth
//!   exceeds the configured threshold.
//! - **[`SenderTask`]**: the background task that owns the wire connection.
//!   It alternates between two states — replaying spilled files and draining
//!   the in-memory queue — reconnecting with a fixed holdoff after a
//!   transport failure and proactively closing idle connections.

use std::{
    collections::VecDeque,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

#[cfg(feature = "stats")]
use std::sync::atomic::AtomicUsize;

use thiserror::Error;
use tokio::{
    fs,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    buffers::{Buffer, BufferPool, BufferQueue, DEFAULT_CHUNK_SIZE},
    spill::{SpillStore, SPILL_PATH_MAX},
    sync::AtomicDuration,
    transport::{Endpoint, Link, TlsContext},
};

/// Max idle time before the worker proactively disconnects.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Holdoff after a failed send before the next reconnect attempt.
const DEFAULT_RECONNECTION_TIME: Duration = Duration::from_secs(30);

/// Queue depth that triggers the producer-side spill to disk.
const DEFAULT_MAX_QUEUED_BUFFERS: usize = 10_000;

/// Per-operation timeout for transport I/O (connect and send).
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker idle and holdoff granularity.
const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_millis(250);

// Worker states. The directory may hold leftovers from a previous run, so a
// fresh worker always starts by draining it.
const SENDING_FILES: u8 = 0;
const SENDING_QUEUED_BUFFERS: u8 = 1;

/// Error returned when a sender cannot be built.
///
/// All of these are configuration errors: the worker task is only spawned
/// once the endpoint, directory, and TLS requirements check out.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The spill directory does not exist or is not a directory.
    #[error("spill path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// The spill directory path exceeds the platform maximum.
    #[error("spill directory path exceeds {} bytes", SPILL_PATH_MAX)]
    PathTooLong,
    /// The spill directory could not be inspected.
    #[error("cannot inspect spill directory: {0}")]
    Io(#[from] io::Error),
}

/// Statistics tracking for the worker task (only available with the `stats`
/// feature).
#[cfg(feature = "stats")]
struct SenderTaskStats {
    /// Number of buffers successfully written to the wire.
    buffers_sent: AtomicUsize,
    /// Total payload bytes successfully written to the wire.
    bytes_sent: AtomicUsize,
    /// Number of spilled files replayed and unlinked.
    files_replayed: AtomicUsize,
    /// Number of buffers written to the spill directory.
    buffers_spilled: AtomicUsize,
}

#[cfg(feature = "stats")]
impl SenderTaskStats {
    fn new() -> Self {
        Self {
            buffers_sent: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
            files_replayed: AtomicUsize::new(0),
            buffers_spilled: AtomicUsize::new(0),
        }
    }
}

/// Snapshot of sender statistics, returned by [`SenderTask::stats`].
#[cfg(feature = "stats")]
#[non_exhaustive]
pub struct SenderStats {
    /// Buffers successfully transmitted.
    pub buffers: usize,
    /// Payload bytes successfully transmitted.
    pub bytes: usize,
    /// Spilled files replayed and removed.
    pub files_replayed: usize,
    /// Buffers spilled to disk.
    pub buffers_spilled: usize,
}

/// State shared between the producer-facing handle and the worker task.
pub(crate) struct Shared {
    queue: BufferQueue,
    pool: Arc<BufferPool>,
    spill: SpillStore,
    /// Current worker state (`SENDING_FILES` / `SENDING_QUEUED_BUFFERS`).
    /// The producer-side spill path forces it back to `SENDING_FILES`.
    state: AtomicU8,
    max_queued_buffers: usize,
    sleep_interval: Duration,
    write_timeout: AtomicDuration,
    idle_timeout: AtomicDuration,
    reconnection_time: AtomicDuration,
    #[cfg(feature = "stats")]
    stats: SenderTaskStats,
}

impl Shared {
    /// Drains the queue and writes every buffer to the spill directory.
    ///
    /// Every drained buffer returns to the pool whether or not its file
    /// could be written; the result is the AND of the individual saves.
    async fn save_buffers(&self) -> bool {
        let Some(chain) = self.queue.pop_all().await else {
            return true;
        };

        let stamp = SpillStore::stamp();
        let mut counter = 0;
        let mut all_saved = true;

        for buf in chain {
            let path = self.spill.unused_path(&stamp, &mut counter).await;
            match buf.save(&path).await {
                Ok(()) => {
                    trace!(path = %path.display(), len = buf.len(), "buffer spilled");
                    #[cfg(feature = "stats")]
                    self.stats.buffers_spilled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to spill buffer");
                    all_saved = false;
                }
            }
            self.pool.put(buf).await;
        }

        all_saved
    }
}

/// Producer-facing handle for a store-and-forward sender.
///
/// Payloads are handed over as [`Buffer`]s taken from the sender's
/// [`BufferPool`], so steady-state traffic performs no per-message
/// allocation.
///
/// # Cloning
///
/// `Sender` is cheaply cloneable (uses [`Arc`] internally). Multiple clones
/// can enqueue buffers concurrently; buffers pushed from one clone are
/// transmitted in push order, while the interleaving across clones is
/// unspecified.
///
/// # Examples
///
/// ```no_run
/// # use ferry::Endpoint;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint: Endpoint = "127.0.0.1:7000".parse()?;
/// let (sender, task) = ferry::sender(endpoint, "/var/spool/ferry").build()?;
///
/// let mut buf = sender.pool().get().await.expect("cannot allocate a buffer");
/// buf.fill(b"payload")?;
/// sender.send(buf).await;
///
/// task.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Sender {
    inner: Arc<Shared>,
}

impl Sender {
    /// Returns the buffer pool producers allocate from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.inner.pool
    }

    /// Enqueues one buffer for transmission.
    ///
    /// If the post-push queue depth exceeds the configured maximum, the
    /// whole backlog is written to the spill directory on the caller's task
    /// and the worker is sent back to file replay.
    pub async fn send(&self, buf: Buffer) {
        if self.inner.queue.push_back(buf).await > self.inner.max_queued_buffers {
            self.spill_backlog().await;
        }
    }

    /// Enqueues a chain of buffers for transmission, preserving its order.
    pub async fn send_many(&self, chain: VecDeque<Buffer>) {
        if self.inner.queue.push_back_many(chain).await > self.inner.max_queued_buffers {
            self.spill_backlog().await;
        }
    }

    async fn spill_backlog(&self) {
        debug!("queue depth over threshold, spilling backlog to disk");
        if !self.inner.save_buffers().await {
            warn!("part of the backlog could not be spilled");
        }
        self.inner.state.store(SENDING_FILES, Ordering::Release);
    }
}

/// Handle for the background worker task.
///
/// The task owns the wire connection and runs until [`stop`](Self::stop) is
/// called; transport failures never terminate it. The timeouts below can be
/// adjusted while the task is running.
pub struct SenderTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
    inner: Arc<Shared>,
}

impl SenderTask {
    /// Sets the per-operation timeout for transport I/O.
    ///
    /// Applies to connection establishment (including the TLS handshake)
    /// and to each whole-payload send. Default: 30 seconds.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.inner.write_timeout.store(timeout, Ordering::Relaxed);
    }

    /// Sets the idle time after which the worker closes the connection.
    ///
    /// A connection over which nothing was sent for this long is closed
    /// proactively; the next queued buffer triggers a fresh connect.
    /// Default: 60 seconds.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.inner.idle_timeout.store(timeout, Ordering::Relaxed);
    }

    /// Sets the holdoff between a transport failure and the next reconnect
    /// attempt.
    ///
    /// There is no exponential backoff and no retry bound: the worker keeps
    /// trying at this fixed pace until the peer comes back. Default: 30
    /// seconds.
    pub fn set_reconnection_time(&self, timeout: Duration) {
        self.inner.reconnection_time.store(timeout, Ordering::Relaxed);
    }

    /// Retrieves current transmission statistics.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            buffers: self.inner.stats.buffers_sent.load(Ordering::Relaxed),
            bytes: self.inner.stats.bytes_sent.load(Ordering::Relaxed),
            files_replayed: self.inner.stats.files_replayed.load(Ordering::Relaxed),
            buffers_spilled: self.inner.stats.buffers_spilled.load(Ordering::Relaxed),
        }
    }

    /// Stops the worker and returns a handle to await its completion.
    ///
    /// The worker observes the stop request between iterations — never in
    /// the middle of a buffer — then flushes any still-queued buffers to the
    /// spill directory before exiting. Once the returned handle resolves, no
    /// further writes to the spill directory occur.
    pub fn stop(self) -> JoinHandle<()> {
        let Self {
            handle,
            token,
            inner: _,
        } = self;
        token.cancel();
        handle
    }
}

/// Builder for configuring and creating a [`Sender`] and [`SenderTask`].
pub struct SenderBuilder {
    endpoint: Endpoint,
    directory: PathBuf,
    tls: Option<TlsContext>,
    pool: Option<Arc<BufferPool>>,
    pool_chunk_size: usize,
    max_queued_buffers: usize,
    write_timeout: Duration,
    idle_timeout: Duration,
    reconnection_time: Duration,
    sleep_interval: Duration,
}

impl SenderBuilder {
    /// Protects the connection with TLS.
    ///
    /// The context carries the client configuration and the server name to
    /// verify; without it the sender speaks plaintext.
    #[must_use]
    pub fn tls(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    /// Uses an existing buffer pool instead of creating a private one.
    ///
    /// Sharing one pool across several senders keeps the total buffer
    /// population shared between them.
    #[must_use]
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the refill batch size of the sender's private buffer pool.
    ///
    /// Ignored when an explicit pool is supplied via [`pool`](Self::pool).
    /// Default: 10 000 buffers.
    #[must_use]
    pub fn pool_chunk_size(mut self, chunk_size: usize) -> Self {
        self.pool_chunk_size = chunk_size;
        self
    }

    /// Sets the queue depth that triggers the producer-side spill.
    ///
    /// Default: 10 000 buffers.
    #[must_use]
    pub fn max_queued_buffers(mut self, max: usize) -> Self {
        self.max_queued_buffers = max;
        self
    }

    /// Sets the initial per-operation transport timeout.
    ///
    /// Default: 30 seconds. Adjustable at runtime via
    /// [`SenderTask::set_write_timeout`].
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the initial idle timeout before a proactive disconnect.
    ///
    /// Default: 60 seconds. Adjustable at runtime via
    /// [`SenderTask::set_idle_timeout`].
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the initial reconnect holdoff.
    ///
    /// Default: 30 seconds. Adjustable at runtime via
    /// [`SenderTask::set_reconnection_time`].
    #[must_use]
    pub fn reconnection_time(mut self, timeout: Duration) -> Self {
        self.reconnection_time = timeout;
        self
    }

    /// Sets the worker's idle and holdoff granularity.
    ///
    /// This bounds both the queue-poll timeout and the sleep between
    /// reconnect attempts. Default: 250 milliseconds.
    #[must_use]
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Validates the configuration, spawns the worker task, and returns the
    /// producer handle and the task handle.
    ///
    /// # Errors
    ///
    /// Fails — without spawning anything — when the spill directory does not
    /// exist, is not a directory, or its path exceeds the platform bound.
    pub fn build(self) -> Result<(Sender, SenderTask), BuildError> {
        let Self {
            endpoint,
            directory,
            tls,
            pool,
            pool_chunk_size,
            max_queued_buffers,
            write_timeout,
            idle_timeout,
            reconnection_time,
            sleep_interval,
        } = self;

        if directory.as_os_str().len() > SPILL_PATH_MAX {
            return Err(BuildError::PathTooLong);
        }
        let meta = std::fs::metadata(&directory).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BuildError::NotADirectory(directory.clone()),
            _ => BuildError::Io(e),
        })?;
        if !meta.is_dir() {
            return Err(BuildError::NotADirectory(directory));
        }

        let inner = Arc::new(Shared {
            queue: BufferQueue::new(),
            pool: pool.unwrap_or_else(|| Arc::new(BufferPool::with_chunk_size(pool_chunk_size))),
            spill: SpillStore::new(directory),
            state: AtomicU8::new(SENDING_FILES),
            max_queued_buffers,
            sleep_interval,
            write_timeout: AtomicDuration::new(write_timeout),
            idle_timeout: AtomicDuration::new(idle_timeout),
            reconnection_time: AtomicDuration::new(reconnection_time),
            #[cfg(feature = "stats")]
            stats: SenderTaskStats::new(),
        });

        let token = CancellationToken::new();
        let worker = Worker {
            inner: inner.clone(),
            link: Link::new(endpoint, tls),
            token: token.clone(),
            now: Instant::now(),
            last_socket_op: Instant::now(),
        };
        let handle = tokio::spawn(worker.run());

        let sender = Sender {
            inner: inner.clone(),
        };
        let task = SenderTask {
            handle,
            token,
            inner,
        };
        Ok((sender, task))
    }
}

// ================================================================================================
// Worker - background I/O
// ================================================================================================

struct Worker {
    inner: Arc<Shared>,
    link: Link,
    token: CancellationToken,
    /// Time of the current iteration, sampled once per tick.
    now: Instant,
    /// Time of the last attempted send or connect.
    last_socket_op: Instant,
}

impl Worker {
    async fn run(mut self) {
        debug!(
            endpoint = %self.link.endpoint(),
            directory = %self.inner.spill.dir().display(),
            "sender worker started",
        );

        let sleep_interval = self.inner.sleep_interval;
        let mut error_sending = false;

        loop {
            self.now = Instant::now();

            if error_sending {
                let holdoff = self.inner.reconnection_time.load(Ordering::Relaxed);
                if self.now.duration_since(self.last_socket_op) >= holdoff {
                    error_sending = !self.connect().await;
                }
                if error_sending {
                    time::sleep(sleep_interval).await;
                    if self.token.is_cancelled() {
                        break;
                    }
                    continue;
                }
            }

            if self.inner.state.load(Ordering::Acquire) == SENDING_QUEUED_BUFFERS {
                match self.inner.queue.pop_all_timeout(sleep_interval).await {
                    Some(chain) => error_sending = !self.flush_chain(chain).await,
                    None => {
                        let idle = self.inner.idle_timeout.load(Ordering::Relaxed);
                        if self.link.connected()
                            && self.now.duration_since(self.last_socket_op) >= idle
                        {
                            debug!("connection idle, disconnecting");
                            self.link.disconnect();
                        }
                    }
                }
            } else {
                error_sending = !self.send_files().await;
            }

            if self.token.is_cancelled() {
                break;
            }
        }

        // Flush whatever is still queued to disk before exiting.
        if !self.inner.save_buffers().await {
            warn!("part of the backlog could not be spilled at shutdown");
        }
        debug!("sender worker stopped");
    }

    /// Sends a private chain of buffers, returning each to the pool as it
    /// goes out. On failure the un-sent suffix goes back to the queue front
    /// and the worker enters error recovery.
    async fn flush_chain(&mut self, mut chain: VecDeque<Buffer>) -> bool {
        if !self.connect().await {
            self.inner.queue.push_front_many(chain).await;
            return false;
        }

        while let Some(buf) = chain.pop_front() {
            if self.send_with_peer_check(buf.as_slice()).await {
                trace!(len = buf.len(), "queued buffer sent");
                #[cfg(feature = "stats")]
                self.inner.stats.buffers_sent.fetch_add(1, Ordering::Relaxed);
                self.inner.pool.put(buf).await;
            } else {
                chain.push_front(buf);
                let requeued = self.inner.queue.push_front_many(chain).await;
                debug!(requeued, "send failed, buffers returned to the queue");
                return false;
            }
        }
        true
    }

    /// Replays the spill directory: every file is one payload, sent whole
    /// and unlinked on success. A failure — reading the file or writing it
    /// to the wire — aborts the scan with the failed file left in place; on
    /// clean completion the worker moves on to the in-memory queue.
    async fn send_files(&mut self) -> bool {
        if !self.connect().await {
            return false;
        }

        let files = match self.inner.spill.scan().await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cannot list spill directory");
                return false;
            }
        };

        for path in files {
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read spilled file");
                    return false;
                }
            };
            if self.send_with_peer_check(&data).await {
                trace!(path = %path.display(), len = data.len(), "spilled file replayed");
                #[cfg(feature = "stats")]
                self.inner.stats.files_replayed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "cannot remove replayed file");
                }
            } else {
                return false;
            }
        }

        self.inner
            .state
            .store(SENDING_QUEUED_BUFFERS, Ordering::Release);
        true
    }

    /// One attempted transmission: probe the peer, then write the payload.
    /// Any failure tears the connection down.
    async fn send_with_peer_check(&mut self, bytes: &[u8]) -> bool {
        self.last_socket_op = self.now;

        if self.link.peer_closed().await {
            debug!("peer closed the connection");
            self.link.disconnect();
            return false;
        }

        let timeout = self.inner.write_timeout.load(Ordering::Relaxed);
        match self.link.send(bytes, timeout).await {
            Ok(()) => {
                #[cfg(feature = "stats")]
                self.inner
                    .stats
                    .bytes_sent
                    .fetch_add(bytes.len(), Ordering::Relaxed);
                true
            }
            Err(e) => {
                debug!(error = %e, "send failed");
                self.link.disconnect();
                false
            }
        }
    }

    /// Lazy connect: a no-op on an established link, otherwise one attempt
    /// bounded by the transport timeout.
    async fn connect(&mut self) -> bool {
        if self.link.connected() {
            return true;
        }

        self.last_socket_op = self.now;
        let timeout = self.inner.write_timeout.load(Ordering::Relaxed);
        match self.link.connect(timeout).await {
            Ok(()) => {
                debug!(endpoint = %self.link.endpoint(), "connected");
                true
            }
            Err(e) => {
                debug!(endpoint = %self.link.endpoint(), error = %e, "connect failed");
                false
            }
        }
    }
}

/// Creates a builder for a sender targeting `endpoint`, spilling to
/// `directory` whenever the peer is unreachable or the backlog grows past
/// the configured threshold.
///
/// The returned builder spawns the worker task on [`build`](SenderBuilder::build),
/// so it must be called within a tokio runtime.
pub fn sender(endpoint: Endpoint, directory: impl Into<PathBuf>) -> SenderBuilder {
    SenderBuilder {
        endpoint,
        directory: directory.into(),
        tls: None,
        pool: None,
        pool_chunk_size: DEFAULT_CHUNK_SIZE,
        max_queued_buffers: DEFAULT_MAX_QUEUED_BUFFERS,
        write_timeout: DEFAULT_WRITE_TIMEOUT,
        idle_timeout: DEFAULT_IDLE_TIMEOUT,
        reconnection_time: DEFAULT_RECONNECTION_TIME,
        sleep_interval: DEFAULT_SLEEP_INTERVAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        "127.0.0.1:9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_build_rejects_missing_directory() {
        let res = sender(endpoint(), "/nonexistent/spool").build();
        assert!(matches!(res, Err(BuildError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_file_as_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let res = sender(endpoint(), file).build();
        assert!(matches!(res, Err(BuildError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_oversized_path() {
        let long = PathBuf::from("/".repeat(SPILL_PATH_MAX + 1));
        let res = sender(endpoint(), long).build();
        assert!(matches!(res, Err(BuildError::PathTooLong)));
    }

    #[tokio::test]
    async fn test_build_spawns_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (_sender, task) = sender(endpoint(), dir.path()).build().unwrap();
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_chunk_size_configures_private_pool() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, task) = sender(endpoint(), dir.path())
            .pool_chunk_size(2)
            .build()
            .unwrap();
        assert!(sender.pool().get().await.is_some());
        task.stop().await.unwrap();
    }
}

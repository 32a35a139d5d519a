//! Ferry: a reliable store-and-forward sender for stream transports.
//!
//! Ferry accepts application-produced byte payloads ("buffers"), transmits
//! them over a single long-lived stream connection — plaintext TCP, a local
//! Unix socket, or TLS — and spills them to a directory on disk whenever the
//! connection is down or the in-memory backlog grows beyond a threshold. On
//! reconnect, spilled files are drained back to the wire before live traffic
//! resumes, so a payload handed to Ferry eventually reaches the peer as long
//! as the peer eventually comes back.
//!
//! # Overview
//!
//! ```text
//!  PRODUCERS                             WORKER TASK
//! ┌──────────┐  pool.get / fill  ┌──────────────────────────┐
//! │ app code │ ────────────────▶ │ queue ──▶ wire (TCP/TLS) │
//! └──────────┘   sender.send     │   │            ▲         │
//!                                │   ▼ overflow   │ replay  │
//!                                │  spill directory         │
//!                                └──────────────────────────┘
//! ```
//!
//! Producers allocate a [`Buffer`] from the [`BufferPool`], fill it once,
//! and hand it to the [`Sender`]. The background worker drains the queue in
//! bulk and writes each payload to the wire; buffers return to the pool
//! after transmission, so steady-state traffic performs no per-message
//! allocation.
//!
//! When a send fails, the un-sent suffix of the batch goes back to the head
//! of the queue, the connection is torn down, and the worker retries at a
//! fixed holdoff — there is no retry bound and the worker never exits on its
//! own. When the queue depth passes the configured threshold, the producer
//! spills the whole backlog to the spill directory; the worker replays the
//! directory (in filename order, which the naming scheme makes
//! chronological) before returning to live traffic. Payloads are opaque:
//! Ferry adds no framing, no acknowledgements, and no ordering guarantee
//! beyond "one producer's buffers leave in push order, spilled batches
//! replay before the live queue".
//!
//! # Quick start
//!
//! ```no_run
//! use ferry::Endpoint;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint: Endpoint = "[::1]:7000".parse()?;
//! let (sender, task) = ferry::sender(endpoint, "/var/spool/ferry").build()?;
//!
//! // Producer side: allocate, fill, enqueue.
//! let mut buf = sender.pool().get().await.expect("cannot allocate a buffer");
//! buf.fill(b"one opaque payload")?;
//! sender.send(buf).await;
//!
//! // Shutdown: remaining queued payloads are spilled to disk.
//! task.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! For a TLS-protected connection, pass a [`TlsContext`] to the builder:
//!
//! ```no_run
//! use ferry::{Endpoint, TlsContext};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsContext::builder()
//!     .root_ca_file("/etc/ferry/ca.pem")?
//!     .build("collector.example.org")?;
//!
//! let endpoint: Endpoint = "192.0.2.10:7001".parse()?;
//! let (sender, task) = ferry::sender(endpoint, "/var/spool/ferry")
//!     .tls(tls)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # The spill directory
//!
//! The directory must exist before the sender is built and must be dedicated
//! to one sender: Ferry assumes it is the only writer. Each spilled payload
//! is one regular file of raw bytes named `YYYYMMDD-HHMMSS_NNNNNN` (local
//! time plus a per-batch counter), so lexicographic replay order is
//! chronological. Files left over from a previous run are replayed first —
//! a fresh worker always starts by draining the directory.
//!
//! # Tuning
//!
//! The builder configures the spill threshold and the initial timeouts; the
//! [`SenderTask`] handle adjusts the timeouts at runtime:
//!
//! - [`SenderBuilder::max_queued_buffers`]: queue depth that triggers the
//!   producer-side spill (default 10 000)
//! - [`SenderBuilder::pool_chunk_size`]: refill batch of the private buffer
//!   pool (default 10 000)
//! - [`SenderTask::set_write_timeout`]: per-operation transport timeout
//!   (default 30 s)
//! - [`SenderTask::set_idle_timeout`]: idle time before a proactive
//!   disconnect (default 60 s)
//! - [`SenderTask::set_reconnection_time`]: holdoff between reconnect
//!   attempts (default 30 s)

mod api;
mod buffers;
mod spill;
mod sync;
mod transport;

pub use api::*;
pub use buffers::{Buffer, BufferPool};
pub use transport::{Endpoint, EndpointParseError, TlsContext, TlsContextBuilder, TlsError};

//! The wire link: one long-lived stream connection to the configured peer.
//!
//! A [`Link`] folds the supported wire variants — plaintext TCP, plaintext
//! Unix, and TLS over either — behind a uniform
//! `connect / disconnect / send / connected / peer_closed` surface. The
//! variant is fixed at construction by the endpoint family and the presence
//! of a [`TlsContext`]; the sender never inspects TLS state directly.

mod addr;
mod tls;

use std::{future::poll_fn, io, pin::Pin, task::Poll, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{TcpStream, UnixStream},
    time,
};
use tokio_rustls::client::TlsStream;

pub use addr::{Endpoint, EndpointParseError};
pub use tls::{TlsContext, TlsContextBuilder, TlsError};

/// The single stream connection a sender writes to.
///
/// Owned exclusively by the worker task after start-up. All operations are
/// bounded by the caller-supplied timeout; `connect` is single-stage (TCP
/// connect plus, for TLS, the client handshake, inside one deadline).
pub(crate) struct Link {
    endpoint: Endpoint,
    tls: Option<TlsContext>,
    stream: Option<Stream>,
}

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
    TlsTcp(Box<TlsStream<TcpStream>>),
    TlsUnix(Box<TlsStream<UnixStream>>),
}

impl Link {
    pub(crate) fn new(endpoint: Endpoint, tls: Option<TlsContext>) -> Self {
        Self {
            endpoint,
            tls,
            stream: None,
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establishes the connection, including the TLS handshake when the
    /// link is encrypted. Idempotent: an established link reconnects only
    /// after an explicit [`disconnect`](Self::disconnect).
    pub(crate) async fn connect(&mut self, timeout: Duration) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = time::timeout(timeout, self.establish())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        self.stream = Some(stream);
        Ok(())
    }

    async fn establish(&self) -> io::Result<Stream> {
        match (&self.endpoint, &self.tls) {
            (Endpoint::Ip(addr), None) => Ok(Stream::Tcp(TcpStream::connect(addr).await?)),
            (Endpoint::Ip(addr), Some(tls)) => {
                let tcp = TcpStream::connect(addr).await?;
                let stream = tls.connector.connect(tls.server_name.clone(), tcp).await?;
                Ok(Stream::TlsTcp(Box::new(stream)))
            }
            (Endpoint::Local(path), None) => Ok(Stream::Unix(UnixStream::connect(path).await?)),
            (Endpoint::Local(path), Some(tls)) => {
                let unix = UnixStream::connect(path).await?;
                let stream = tls.connector.connect(tls.server_name.clone(), unix).await?;
                Ok(Stream::TlsUnix(Box::new(stream)))
            }
        }
    }

    /// Closes the connection, releasing descriptors and TLS session state.
    pub(crate) fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Writes the whole payload, looping over short writes, within one
    /// timeout.
    pub(crate) async fn send(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link is not connected"));
        };
        let write = async {
            match stream {
                Stream::Tcp(s) => write_all(s, bytes).await,
                Stream::Unix(s) => write_all(s, bytes).await,
                Stream::TlsTcp(s) => write_all(s, bytes).await,
                Stream::TlsUnix(s) => write_all(s, bytes).await,
            }
        };
        time::timeout(timeout, write)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "send timed out"))?
    }

    /// Probes whether the peer has closed the connection.
    ///
    /// The probe is a non-blocking read of up to 1 KiB: a clean end-of-stream
    /// reports "closed", anything else — pending, data, or an error the next
    /// send will surface — reports "open". The probe is destructive:
    /// unsolicited bytes from the peer are discarded, which is acceptable for
    /// a write-only protocol.
    pub(crate) async fn peer_closed(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match stream {
            Stream::Tcp(s) => probe_closed(s).await,
            Stream::Unix(s) => probe_closed(s).await,
            Stream::TlsTcp(s) => probe_closed(s).await,
            Stream::TlsUnix(s) => probe_closed(s).await,
        }
    }
}

async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

async fn probe_closed<S>(stream: &mut S) -> bool
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    poll_fn(|cx| {
        let mut read_buf = ReadBuf::new(&mut buf);
        match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(read_buf.filled().is_empty()),
            Poll::Ready(Err(_)) => Poll::Ready(false),
            Poll::Pending => Poll::Ready(false),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::AsyncReadExt,
        net::{TcpListener, UnixListener},
    };

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_connect_send_disconnect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::Ip(listener.local_addr().unwrap());

        let mut link = Link::new(endpoint, None);
        assert!(!link.connected());
        link.connect(TIMEOUT).await.unwrap();
        assert!(link.connected());

        // Connect is idempotent on an established link.
        link.connect(TIMEOUT).await.unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        link.send(b"payload", TIMEOUT).await.unwrap();

        let mut received = [0u8; 7];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"payload");

        link.disconnect();
        assert!(!link.connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind and drop to find a port with nothing listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let mut link = Link::new(Endpoint::Ip(addr), None);
        assert!(link.connect(TIMEOUT).await.is_err());
        assert!(!link.connected());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let addr = "127.0.0.1:9".parse().unwrap();
        let mut link = Link::new(Endpoint::Ip(addr), None);
        let err = link.send(b"x", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_peer_closed_detection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::Ip(listener.local_addr().unwrap());

        let mut link = Link::new(endpoint, None);
        link.connect(TIMEOUT).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        // Open connection, no data: the probe reports open.
        assert!(!link.peer_closed().await);

        drop(peer);
        // Give the FIN a moment to arrive.
        time::sleep(Duration::from_millis(50)).await;
        assert!(link.peer_closed().await);
    }

    #[tokio::test]
    async fn test_peer_data_is_discarded_by_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::Ip(listener.local_addr().unwrap());

        let mut link = Link::new(endpoint, None);
        link.connect(TIMEOUT).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        peer.write_all(b"unsolicited").await.unwrap();
        time::sleep(Duration::from_millis(50)).await;

        // Unsolicited bytes do not read as a close.
        assert!(!link.peer_closed().await);
    }

    #[tokio::test]
    async fn test_connect_send_unix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut link = Link::new(Endpoint::Local(path), None);
        link.connect(TIMEOUT).await.unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        link.send(b"local", TIMEOUT).await.unwrap();

        let mut received = [0u8; 5];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"local");
    }
}

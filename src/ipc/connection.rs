//! Single-call connection lifecycle.
//!
//! A [`Connection`] is opened for exactly one request. It connects, writes
//! the framed request, waits for one framed reply, then shuts the socket
//! down. On any failure it moves to [`ConnectionState::Errored`] and the
//! socket is dropped, so no handle outlives the call.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::ipc::framing::{read_message, write_message, Framing};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    AwaitingReply,
    Closed,
    /// Absorbing failure state.
    Errored,
}

impl ConnectionState {
    /// True once the connection can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

/// One-shot connection carrying a single request and its reply.
#[derive(Debug)]
pub struct Connection {
    socket_path: PathBuf,
    framing: Framing,
    max_message_size: usize,
    timeout: Option<Duration>,
    state: ConnectionState,
}

impl Connection {
    /// Prepare a connection to `socket_path`. Nothing is opened yet.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            framing: Framing::default(),
            max_message_size: crate::ipc::framing::MAX_MESSAGE_SIZE,
            timeout: None,
            state: ConnectionState::Idle,
        }
    }

    /// Frame format used for the request and the reply.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Largest reply body accepted.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Bound the whole connect/send/receive sequence.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Send `request` and return the raw reply payload.
    ///
    /// Resolves exactly once. The socket is closed on every exit path,
    /// including timeout, after which the connection is in a terminal state.
    pub async fn execute(&mut self, request: &[u8]) -> Result<Vec<u8>, RpcError> {
        if self.state != ConnectionState::Idle {
            return Err(RpcError::InvalidRequest(format!(
                "connection already used (state {:?})",
                self.state
            )));
        }

        let result = match self.timeout {
            Some(limit) => match timeout(limit, self.run(request)).await {
                Ok(result) => result,
                // The in-flight future owned the stream; dropping it closed the socket.
                Err(_) => Err(RpcError::Timeout(limit)),
            },
            None => self.run(request).await,
        };

        if let Err(e) = &result {
            debug!(
                socket = %self.socket_path.display(),
                from = ?self.state,
                error = %e,
                "Connection errored"
            );
            self.transition(ConnectionState::Errored);
        }

        result
    }

    async fn run(&mut self, request: &[u8]) -> Result<Vec<u8>, RpcError> {
        let total_start = Instant::now();

        self.transition(ConnectionState::Connecting);
        let connect_start = Instant::now();
        let stream = UnixStream::connect(&self.socket_path).await?;
        let connect_elapsed = connect_start.elapsed();
        self.transition(ConnectionState::Connected);

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let write_start = Instant::now();
        write_message(&mut write_half, self.framing, request).await?;
        let write_elapsed = write_start.elapsed();
        self.transition(ConnectionState::AwaitingReply);

        let read_start = Instant::now();
        let reply = read_message(&mut reader, self.framing, self.max_message_size).await?;
        let read_elapsed = read_start.elapsed();

        // Best effort: the peer may already have closed its end.
        if let Err(e) = write_half.shutdown().await {
            trace!("Shutdown after reply failed: {}", e);
        }
        drop(write_half);
        drop(reader);
        self.transition(ConnectionState::Closed);

        debug!(
            total_ms = total_start.elapsed().as_micros() as f64 / 1000.0,
            connect_ms = connect_elapsed.as_micros() as f64 / 1000.0,
            write_ms = write_elapsed.as_micros() as f64 / 1000.0,
            read_ms = read_elapsed.as_micros() as f64 / 1000.0,
            "IPC timing breakdown"
        );

        Ok(reply)
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_socket_path(test_name: &str) -> PathBuf {
        let pid = std::process::id();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        PathBuf::from(format!(
            "/tmp/sockrpc-conn-{}-{}-{}.sock",
            test_name, pid, timestamp
        ))
    }

    #[tokio::test]
    async fn test_execute_roundtrip_closes() {
        let path = test_socket_path("roundtrip");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let request = read_message(&mut reader, Framing::ContentLength, 1024)
                .await
                .unwrap();
            write_message(&mut write_half, Framing::ContentLength, &request)
                .await
                .unwrap();
            // Client shuts down after the reply, so the next read sees EOF.
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let mut conn = Connection::new(&path).with_timeout(Some(TEST_TIMEOUT));
        assert_eq!(conn.state(), ConnectionState::Idle);
        let reply = conn.execute(b"{\"id\":1}").await.unwrap();
        assert_eq!(reply, b"{\"id\":1}");
        assert_eq!(conn.state(), ConnectionState::Closed);

        let leftover = tokio::time::timeout(TEST_TIMEOUT, server)
            .await
            .expect("server never saw EOF")
            .unwrap();
        assert!(leftover.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_execute_nonexistent_socket() {
        let path = test_socket_path("missing");
        let mut conn = Connection::new(&path);
        let err = conn.execute(b"{}").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionFailed(_)), "got: {:?}", err);
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let path = test_socket_path("silent");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Never reply; wait until the client gives up and closes.
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let limit = Duration::from_millis(100);
        let mut conn = Connection::new(&path).with_timeout(Some(limit));
        let err = conn.execute(b"{\"id\":1}").await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(d) if d == limit), "got: {:?}", err);
        assert_eq!(conn.state(), ConnectionState::Errored);

        // Server observes EOF because the client side was dropped.
        tokio::time::timeout(TEST_TIMEOUT, server)
            .await
            .expect("client connection leaked")
            .unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_execute_server_hangs_up() {
        let path = test_socket_path("hangup");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let _ = read_message(&mut reader, Framing::ContentLength, 1024).await;
            // drop without replying
        });

        let mut conn = Connection::new(&path).with_timeout(Some(TEST_TIMEOUT));
        let err = conn.execute(b"{\"id\":1}").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed), "got: {:?}", err);
        assert_eq!(err.kind(), ErrorKind::Transport);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_connection_is_single_use() {
        let path = test_socket_path("reuse");
        let mut conn = Connection::new(&path);
        let _ = conn.execute(b"{}").await;
        assert!(conn.state().is_terminal());

        let err = conn.execute(b"{}").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}

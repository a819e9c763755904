//! RPC client using one connection per call.
//!
//! This module provides `RpcClient`, an async client that opens a fresh Unix
//! socket connection for every call, sends one framed request and waits for
//! one framed reply with automatic timeout handling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::facade::Caller;
use crate::ipc::connection::Connection;
use crate::ipc::correlator::Correlator;
use crate::ipc::framing::{Framing, MAX_MESSAGE_SIZE};
use crate::protocol::{decode_outcome, CallRequest, ParamType};

/// Socket path used when none is given.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rpc_socket";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings shared by both client variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Path of the server's Unix socket.
    pub socket_path: PathBuf,
    /// Bound on each call. `None` waits forever.
    pub timeout: Option<Duration>,
    /// How payloads are delimited on the stream.
    pub framing: Framing,
    /// Largest reply body accepted.
    pub max_message_size: usize,
}

impl ClientConfig {
    /// Default settings for the given socket path.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            framing: Framing::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// RPC client that opens a dedicated connection for each call.
///
/// Calls take `&self`, so one client can run many calls concurrently; each
/// gets its own socket and its own id. Nothing is shared between calls except
/// the id counter.
///
/// # Example
///
/// ```ignore
/// use sockrpc::{RemoteMethods, RpcClient};
///
/// let client = RpcClient::new("/tmp/rpc_socket");
/// let reversed = client.reverse("hello").await?;
/// let raw = client.call("floor", vec![json!(3.7)], vec![ParamType::Float]).await?;
/// ```
#[derive(Debug)]
pub struct RpcClient {
    config: ClientConfig,
    correlator: Correlator,
}

impl RpcClient {
    /// Create a client for the given socket path with default settings.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_config(ClientConfig::new(socket_path))
    }

    /// Create a client from explicit settings.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            correlator: Correlator::new(),
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set the request timeout duration.
    ///
    /// Default is 30 seconds. `None` disables the bound.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeout = timeout;
    }

    /// Id of the most recent call, or 0 before the first one.
    pub fn last_request_id(&self) -> u64 {
        self.correlator.last_issued()
    }

    /// Invoke `method` on the server and wait for its result.
    ///
    /// This method:
    /// 1. Takes the next id and builds the request
    /// 2. Opens a connection and sends the framed request
    /// 3. Waits for the reply (with timeout) and closes the connection
    /// 4. Checks the reply id, then extracts `results` or `error`
    ///
    /// # Errors
    ///
    /// - `RpcError::InvalidRequest` if `method` is empty or the type tags do
    ///   not line up with `params`
    /// - a transport error if the server is unreachable, hangs up or times out
    /// - `RpcError::Decode` if the reply is not a JSON object
    /// - `RpcError::Correlation` if the reply id differs from the request id
    /// - `RpcError::Server` if the server reported an error
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
    ) -> Result<Value, RpcError> {
        let id = self.correlator.next_id();
        let request = CallRequest::new(method, params, param_types, id)?;
        let payload = request.encode()?;

        debug!(method, id, socket = %self.config.socket_path.display(), "Calling");
        trace!("Sending: {}", payload);

        let mut connection = Connection::new(&self.config.socket_path)
            .with_framing(self.config.framing)
            .with_max_message_size(self.config.max_message_size)
            .with_timeout(self.config.timeout);
        let reply = connection.execute(payload.as_bytes()).await?;

        trace!("Received: {}", String::from_utf8_lossy(&reply));

        let outcome = decode_outcome(&reply, id);
        if let Err(e) = &outcome {
            debug!(method, id, error = %e, "Call failed");
        }
        outcome
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::with_config(ClientConfig::default())
    }
}

#[async_trait]
impl Caller for RpcClient {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
    ) -> Result<Value, RpcError> {
        RpcClient::call(self, method, params, param_types).await
    }
}

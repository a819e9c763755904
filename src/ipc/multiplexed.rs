//! RPC client sharing one persistent connection between calls.
//!
//! Requests are written on a single socket; a background task reads replies
//! and routes each one to its waiting call by correlation id, so concurrent
//! calls may complete in any order. A reply that cannot be routed means the
//! stream is out of sync, so the connection is closed and every waiting call
//! fails with the reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::RpcError;
use crate::facade::Caller;
use crate::ipc::client::ClientConfig;
use crate::ipc::correlator::Correlator;
use crate::ipc::framing::{read_message, write_message, Framing};
use crate::protocol::{CallRequest, ParamType, Reply};

/// Frames queued for the writer task before callers wait for room.
const OUTGOING_QUEUE: usize = 64;

type ReplySender = oneshot::Sender<Result<Value, RpcError>>;

/// State shared between callers and the reader and writer tasks.
#[derive(Default)]
struct Shared {
    pending: DashMap<u64, ReplySender>,
    /// Ids whose caller gave up; their replies may still arrive.
    abandoned: DashSet<u64>,
    closed: AtomicBool,
}

/// Why the connection was torn down.
#[derive(Debug)]
enum Disconnect {
    Closed,
    Undecodable(String),
    Unmatched(Option<Value>),
}

impl Disconnect {
    fn error_for(&self, id: u64) -> RpcError {
        match self {
            Disconnect::Closed => RpcError::ConnectionClosed,
            Disconnect::Undecodable(reason) => {
                RpcError::Decode(serde::de::Error::custom(reason.as_str()))
            }
            Disconnect::Unmatched(received) => RpcError::Correlation {
                expected: id,
                received: received.clone(),
            },
        }
    }
}

impl Shared {
    /// Mark the connection closed and fail every call still waiting.
    ///
    /// `closed` is set before the drain, so a call inserted afterwards sees
    /// it and fails on its own.
    fn shut_down(&self, cause: &Disconnect) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(cause.error_for(id)));
            }
        }
    }
}

/// Removes a call's pending entry however the call ends.
///
/// If no reply was delivered yet the id is recorded as abandoned, so a late
/// reply is not mistaken for a desynchronised stream.
struct PendingCall<'a> {
    id: u64,
    shared: &'a Shared,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        // Abandon first so the reader never sees the id in neither table.
        self.shared.abandoned.insert(self.id);
        if self.shared.pending.remove(&self.id).is_none() {
            self.shared.abandoned.remove(&self.id);
        }
    }
}

/// RPC client multiplexing all calls over one connection.
pub struct MultiplexedClient {
    config: ClientConfig,
    correlator: Correlator,
    outgoing: mpsc::Sender<Vec<u8>>,
    shared: Arc<Shared>,
    reader_handle: JoinHandle<()>,
}

impl MultiplexedClient {
    /// Connect to the server and start routing replies.
    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        let stream = UnixStream::connect(&config.socket_path)
            .await
            .map_err(RpcError::ConnectionFailed)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::default());
        let (outgoing, queue) = mpsc::channel(OUTGOING_QUEUE);

        tokio::spawn(writer_loop(
            write_half,
            config.framing,
            queue,
            Arc::clone(&shared),
        ));
        let reader_handle = tokio::spawn(reader_loop(
            BufReader::new(read_half),
            config.framing,
            config.max_message_size,
            Arc::clone(&shared),
        ));

        debug!(socket = %config.socket_path.display(), "Multiplexed connection open");

        Ok(Self {
            config,
            correlator: Correlator::new(),
            outgoing,
            shared,
            reader_handle,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Id of the most recent call, or 0 before the first one.
    pub fn last_request_id(&self) -> u64 {
        self.correlator.last_issued()
    }

    /// True once the connection failed or the server sent a bad reply.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of calls waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    /// Invoke `method` on the server over the shared connection.
    ///
    /// The timeout covers queueing the request and waiting for the reply.
    /// The frame itself is written by the writer task, so it always reaches
    /// the socket whole even if this call gives up first.
    ///
    /// Fails with `RpcError::ConnectionClosed` once the connection is down.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
    ) -> Result<Value, RpcError> {
        let id = self.correlator.next_id();
        let request = CallRequest::new(method, params, param_types, id)?;
        let payload = request.encode()?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }
        let _guard = PendingCall {
            id,
            shared: &self.shared,
        };

        debug!(method, id, "Calling (multiplexed)");
        trace!("Sending: {}", payload);

        let exchange = async {
            self.outgoing
                .send(payload.into_bytes())
                .await
                .map_err(|_| RpcError::ConnectionClosed)?;
            // Sender dropped without a value means the reader task is gone.
            rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
        };

        match self.config.timeout {
            Some(limit) => match timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout(limit)),
            },
            None => exchange.await,
        }
    }
}

impl Drop for MultiplexedClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

#[async_trait]
impl Caller for MultiplexedClient {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
    ) -> Result<Value, RpcError> {
        MultiplexedClient::call(self, method, params, param_types).await
    }
}

async fn writer_loop(
    mut writer: OwnedWriteHalf,
    framing: Framing,
    mut queue: mpsc::Receiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    while let Some(body) = queue.recv().await {
        if let Err(e) = write_message(&mut writer, framing, &body).await {
            warn!(error = %e, pending = shared.pending.len(), "Multiplexed writer failed");
            shared.shut_down(&Disconnect::Closed);
            break;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Multiplexed writer stopped");
}

async fn reader_loop(
    mut reader: BufReader<OwnedReadHalf>,
    framing: Framing,
    max_message_size: usize,
    shared: Arc<Shared>,
) {
    let cause = loop {
        let frame = match read_message(&mut reader, framing, max_message_size).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, pending = shared.pending.len(), "Multiplexed reader stopped");
                break Disconnect::Closed;
            }
        };
        trace!("Received: {}", String::from_utf8_lossy(&frame));

        let reply = match Reply::decode(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Undecodable reply, closing connection");
                let reason = match e {
                    RpcError::Decode(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                break Disconnect::Undecodable(reason);
            }
        };

        let Some(id) = reply.numeric_id() else {
            warn!(id = ?reply.id, "Reply without a usable id, closing connection");
            break Disconnect::Unmatched(reply.id);
        };

        if let Some((_, tx)) = shared.pending.remove(&id) {
            // Receiver is gone if the call timed out meanwhile.
            let _ = tx.send(reply.into_outcome(id));
        } else if shared.abandoned.remove(&id).is_some() {
            debug!(id, "Discarding late reply");
        } else {
            warn!(id, "Reply for unknown request, closing connection");
            break Disconnect::Unmatched(reply.id);
        }
    };

    shared.shut_down(&cause);
}

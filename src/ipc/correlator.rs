//! Request id generation and reply matching.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::RpcError;

/// Issues correlation ids for one client instance.
///
/// Ids start at 1 and strictly increase. An id is consumed as soon as it is
/// issued, whether or not the call that took it ever reaches the server.
#[derive(Debug)]
pub struct Correlator {
    next: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate the next request id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Most recently issued id, or 0 if none was issued yet.
    pub fn last_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a reply id belongs to the request that was sent.
pub fn check(expected: u64, received: Option<&Value>) -> Result<(), RpcError> {
    match received.and_then(Value::as_u64) {
        Some(id) if id == expected => Ok(()),
        _ => Err(RpcError::Correlation {
            expected,
            received: received.cloned(),
        }),
    }
}

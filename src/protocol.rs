//! Wire messages exchanged with the RPC server.
//!
//! A request is a JSON object with the fields `method`, `params`,
//! `param_Types` and `id`, always serialized in that order. A reply carries
//! the echoed `id` and either `results` or `error`.
//!
//! ```text
//! -> {"method":"reverse","params":["hello"],"param_Types":["str"],"id":2}
//! <- {"id":2,"results":"olleh"}
//! <- {"id":3,"error":"Method nonexistent not found"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::ipc::correlator;

/// Type tag sent alongside each parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Str,
    List,
}

impl ParamType {
    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "str",
            ParamType::List => "list",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single call as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Remote operation name
    pub method: String,
    /// Positional arguments
    pub params: Vec<Value>,
    /// One tag per entry in `params`
    #[serde(rename = "param_Types")]
    pub param_types: Vec<ParamType>,
    /// Correlation id, unique per client instance
    pub id: u64,
}

impl CallRequest {
    /// Build a request, rejecting an empty method name or a tag list whose
    /// length differs from the parameter list.
    pub fn new(
        method: impl Into<String>,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
        id: u64,
    ) -> Result<Self, RpcError> {
        let method = method.into();
        if method.is_empty() {
            return Err(RpcError::InvalidRequest(
                "method name must not be empty".to_string(),
            ));
        }
        if params.len() != param_types.len() {
            return Err(RpcError::InvalidRequest(format!(
                "{} params but {} param types for method {}",
                params.len(),
                param_types.len(),
                method
            )));
        }

        Ok(Self {
            method,
            params,
            param_types,
            id,
        })
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String, RpcError> {
        serde_json::to_string(self).map_err(RpcError::Decode)
    }
}

/// A reply as received from the server.
///
/// Fields are kept loose (`Value`) so that a reply with an odd id or error
/// type is still parsed and then rejected with a precise error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Echo of the request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Success value, may be null for operations without a result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Reply {
    /// Create a success reply.
    pub fn success(id: u64, results: Value) -> Self {
        Self {
            id: Some(Value::from(id)),
            results: Some(results),
            error: None,
        }
    }

    /// Create an error reply.
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id: Some(Value::from(id)),
            results: None,
            error: Some(Value::String(message.into())),
        }
    }

    /// Parse one reply payload.
    ///
    /// Anything that is not a JSON object fails with [`RpcError::Decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(RpcError::Decode(serde::de::Error::custom(
                "reply must be a JSON object",
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The id as an unsigned integer, if it is one.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Interpret the reply without checking its id.
    ///
    /// A non-null `error` wins over `results`. Missing or null `results`
    /// resolve to `Value::Null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            None => Ok(self.results.unwrap_or(Value::Null)),
            Some(Value::String(message)) => Err(RpcError::Server { message }),
            Some(other) => Err(RpcError::Server {
                message: other.to_string(),
            }),
        }
    }

    /// Validate the id against the request and interpret the reply.
    ///
    /// An id mismatch is reported even when `results` is well-formed.
    pub fn into_outcome(self, expected_id: u64) -> Result<Value, RpcError> {
        correlator::check(expected_id, self.id.as_ref())?;
        self.into_result()
    }
}

/// Decode a reply payload and resolve it against the request id.
pub fn decode_outcome(bytes: &[u8], expected_id: u64) -> Result<Value, RpcError> {
    Reply::decode(bytes)?.into_outcome(expected_id)
}

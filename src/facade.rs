//! Typed wrappers for the operations the server exposes.
//!
//! [`Caller`] is the generic call path both client variants implement.
//! [`RemoteMethods`] layers one fixed-signature method per remote function
//! on top of it and is implemented for every `Caller`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::RpcError;
use crate::protocol::ParamType;

/// Generic call path: method name, positional params and their type tags.
#[async_trait]
pub trait Caller: Send + Sync {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        param_types: Vec<ParamType>,
    ) -> Result<Value, RpcError>;
}

/// Convert a raw result into the type a facade method returns.
fn typed<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(RpcError::Decode)
}

/// Accept `3` as well as `3.0`; reject anything with a fraction.
fn integral(value: Value) -> Result<i64, RpcError> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Ok(f as i64)
        }
        _ => typed(value),
    }
}

/// The server's operations, one method each.
#[async_trait]
pub trait RemoteMethods: Caller {
    /// Largest integer not greater than `x`.
    async fn floor(&self, x: f64) -> Result<i64, RpcError> {
        let value = self.call("floor", vec![json!(x)], vec![ParamType::Float]).await?;
        integral(value)
    }

    /// `n`-th root of `x`.
    async fn nroot(&self, n: i64, x: i64) -> Result<f64, RpcError> {
        let value = self
            .call(
                "nroot",
                vec![json!(n), json!(x)],
                vec![ParamType::Int, ParamType::Int],
            )
            .await?;
        typed(value)
    }

    async fn reverse(&self, s: &str) -> Result<String, RpcError> {
        let value = self.call("reverse", vec![json!(s)], vec![ParamType::Str]).await?;
        typed(value)
    }

    /// Whether `a` and `b` are anagrams of each other.
    async fn valid_anagram(&self, a: &str, b: &str) -> Result<bool, RpcError> {
        let value = self
            .call(
                "validAnagram",
                vec![json!(a), json!(b)],
                vec![ParamType::Str, ParamType::Str],
            )
            .await?;
        typed(value)
    }

    async fn sort<S>(&self, items: &[S]) -> Result<Vec<String>, RpcError>
    where
        S: AsRef<str> + Sync,
    {
        let list: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
        let value = self.call("sort", vec![json!(list)], vec![ParamType::List]).await?;
        typed(value)
    }
}

impl<C: Caller + ?Sized> RemoteMethods for C {}

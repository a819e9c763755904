//! sockrpc Library
//!
//! Async client for a small RPC server on a local Unix socket:
//!
//! - `ipc` - connection handling, framing, id correlation, both clients
//! - `protocol` - request and reply wire messages
//! - `facade` - typed wrappers for the server's operations
//! - `error` - the `RpcError` taxonomy
//!
//! ```ignore
//! use sockrpc::{RemoteMethods, RpcClient};
//!
//! let client = RpcClient::new("/tmp/rpc_socket");
//! assert_eq!(client.floor(3.7).await?, 3);
//! assert!(client.valid_anagram("listen", "silent").await?);
//! ```

pub mod error;
pub mod facade;
pub mod ipc;
pub mod protocol;

pub use error::{ErrorKind, RpcError};
pub use facade::{Caller, RemoteMethods};
pub use ipc::{ClientConfig, Framing, MultiplexedClient, RpcClient, DEFAULT_SOCKET_PATH};
pub use protocol::{CallRequest, ParamType, Reply};

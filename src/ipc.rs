//! Socket transport for RPC calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐         Unix Socket          ┌─────────────────────┐
//! │   RpcClient     │  ◄──────────────────────────►│     RPC server      │
//! │ (conn per call) │     JSON + framing           │  (floor, sort, ...) │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! `RpcClient` opens a connection per call and closes it once the reply is
//! in. `MultiplexedClient` keeps one connection open and demultiplexes
//! replies by id.
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing (same as LSP) by default:
//!
//! ```text
//! Content-Length: 64\r\n
//! \r\n
//! {"method":"floor","params":[3.7],"param_Types":["float"],"id":1}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sockrpc::ipc::RpcClient;
//! use sockrpc::RemoteMethods;
//!
//! let client = RpcClient::new("/tmp/rpc_socket");
//! let sorted = client.sort(&["banana", "apple", "cherry"]).await?;
//! ```

mod client;
mod connection;
pub(crate) mod correlator;
mod framing;
mod multiplexed;

pub use client::{ClientConfig, RpcClient, DEFAULT_SOCKET_PATH};
pub use connection::{Connection, ConnectionState};
pub use correlator::Correlator;
pub use framing::{read_message, write_message, Framing, MAX_MESSAGE_SIZE};
pub use multiplexed::MultiplexedClient;

//! Delta Chat transport adapter.
//!
//! Drives `deltachat-rpc-server` over JSON-RPC on its stdio and implements the
//! core [`Transport`](tb_core::transport::port::Transport) port.

pub mod client;
pub mod mapping;
pub mod transport;

pub use transport::RpcTransport;

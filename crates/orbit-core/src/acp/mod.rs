//! ACP (Agent Control Protocol) client layer
//!
//! A JSON-RPC 2.0 engine over a provider subprocess transport:
//! - `transport` - newline-delimited framing over stdin/stdout
//! - `protocol`  - request builders and inbound frame classification
//! - `client`    - request correlation, timeouts, notification listeners

mod client;
mod protocol;
mod transport;

pub use client::{AcpClient, AcpNotification};
pub use protocol::{AcpMessage, ProtocolHandler};
pub use transport::{AcpTransport, ProcessTransport};

#[cfg(test)]
pub(crate) use transport::testing;

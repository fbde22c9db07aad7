//! Relay router layer
//!
//! Routes JSON frames between `client` (UI) and `anchor` (agent host)
//! sockets by logical thread id, with a mandatory hello handshake and
//! exactly-once delivery for RPC-style frames.

mod router;
mod wire;

pub use router::{PeerHandle, RelayRouter, DEFAULT_PARK_TTL};
pub use wire::{
    hello_frame, undeliverable_frame, PeerRole, RelayFrame, HELLO_TYPE, RELAY_PROTOCOL_VERSION,
    SUBSCRIBE_TYPE, UNDELIVERABLE_TYPE,
};

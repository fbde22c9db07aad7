//! Relay wire shapes
//!
//! Every frame is a JSON object with at least `{type: string}`. Routed
//! frames carry `threadId`; RPC-style frames additionally carry `id`. The
//! router forwards the original object byte-for-byte; this module only
//! provides a parsed view over it.

use crate::error::{Error, RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mandatory greeting sent to every peer immediately after connect
pub const HELLO_TYPE: &str = "orbit.hello";

/// Explicit thread binding without sending routed traffic
pub const SUBSCRIBE_TYPE: &str = "orbit.subscribe";

/// Report sent to the origin when a targeted frame expires unparked
pub const UNDELIVERABLE_TYPE: &str = "orbit.undeliverable";

/// Relay protocol revision advertised in the hello
pub const RELAY_PROTOCOL_VERSION: u32 = 1;

/// Socket roles on the relay
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Remote UI
    Client,
    /// Machine actually running the agent backend
    Anchor,
}

impl PeerRole {
    pub fn opposite(self) -> Self {
        match self {
            PeerRole::Client => PeerRole::Anchor,
            PeerRole::Anchor => PeerRole::Client,
        }
    }
}

/// Parsed view over one relay frame; `value` is the untouched original
#[derive(Debug, Clone)]
pub struct RelayFrame {
    pub value: Value,
}

impl RelayFrame {
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::Relay(RelayError::MalformedFrame(e.to_string())))?;

        if !value.is_object() {
            return Err(Error::Relay(RelayError::MalformedFrame(
                "frame must be a JSON object".to_string(),
            )));
        }
        if value.get("type").and_then(|v| v.as_str()).is_none() {
            return Err(Error::Relay(RelayError::MalformedFrame(
                "frame missing string 'type'".to_string(),
            )));
        }

        Ok(Self { value })
    }

    pub fn msg_type(&self) -> &str {
        self.value.get("type").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.value.get("threadId").and_then(|v| v.as_str())
    }

    pub fn id(&self) -> Option<&Value> {
        self.value.get("id")
    }

    /// RPC-style: carries both `id` and `threadId`, and must reach exactly
    /// one matching peer.
    pub fn is_targeted(&self) -> bool {
        self.id().is_some() && self.thread_id().is_some()
    }
}

/// Build the hello frame sent on connect
pub fn hello_frame(peer_id: uuid::Uuid, role: PeerRole) -> Value {
    serde_json::json!({
        "type": HELLO_TYPE,
        "peerId": peer_id.to_string(),
        "role": role,
        "protocol": RELAY_PROTOCOL_VERSION,
    })
}

/// Build the undeliverable report for an expired targeted frame
pub fn undeliverable_frame(id: &Value, thread_id: &str) -> Value {
    serde_json::json!({
        "type": UNDELIVERABLE_TYPE,
        "id": id,
        "threadId": thread_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_requires_object_with_type() {
        assert!(RelayFrame::parse("not json").is_err());
        assert!(RelayFrame::parse("[1,2]").is_err());
        assert!(RelayFrame::parse("{\"threadId\":\"t1\"}").is_err());
        assert!(RelayFrame::parse("{\"type\":\"ci.ping\"}").is_ok());
    }

    #[test]
    fn test_targeted_needs_both_id_and_thread() {
        let frame = RelayFrame::parse(&json!({"type": "ci.ping", "id": 1}).to_string()).unwrap();
        assert!(!frame.is_targeted());

        let frame = RelayFrame::parse(
            &json!({"type": "ci.ping", "id": 1, "threadId": "t1"}).to_string(),
        )
        .unwrap();
        assert!(frame.is_targeted());
        assert_eq!(frame.thread_id(), Some("t1"));
    }

    #[test]
    fn test_hello_frame_shape() {
        let peer_id = uuid::Uuid::new_v4();
        let hello = hello_frame(peer_id, PeerRole::Anchor);
        assert_eq!(hello["type"], json!(HELLO_TYPE));
        assert_eq!(hello["role"], json!("anchor"));
        assert_eq!(hello["peerId"], json!(peer_id.to_string()));
    }

    #[test]
    fn test_role_opposite() {
        assert_eq!(PeerRole::Client.opposite(), PeerRole::Anchor);
        assert_eq!(PeerRole::Anchor.opposite(), PeerRole::Client);
    }
}

//! ACP protocol message handling

use crate::error::{AcpError, Error, Result};
use crate::types::{
    ClientInfo, JsonRpcRequest, JsonRpcResponse, PromptOptions, SessionFilters,
    ACP_PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Builds outbound requests and classifies inbound frames
pub struct ProtocolHandler {
    request_id: AtomicU64,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            request_id: AtomicU64::new(1),
        }
    }

    /// Generate next request ID
    pub fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create initialize request.
    ///
    /// The real provider handshake sequence is unconfirmed; a protocol
    /// version and client info are sent and the reply is treated leniently.
    pub fn create_initialize_request(&self, declared: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": ACP_PROTOCOL_VERSION,
                "clientInfo": ClientInfo::default(),
                "capabilities": declared,
            })),
        )
    }

    /// Create session/list request
    pub fn create_session_list_request(
        &self,
        cursor: Option<&str>,
        filters: &SessionFilters,
    ) -> JsonRpcRequest {
        let mut params = serde_json::json!({});
        if let Some(cursor) = cursor {
            params["cursor"] = serde_json::json!(cursor);
        }
        if !filters.is_empty() {
            params["filters"] = serde_json::to_value(filters).unwrap_or_default();
        }
        JsonRpcRequest::new(self.next_id(), "session/list", Some(params))
    }

    /// Create session/open request
    pub fn create_session_open_request(&self, session_id: &str) -> JsonRpcRequest {
        JsonRpcRequest::new(
            self.next_id(),
            "session/open",
            Some(serde_json::json!({ "sessionId": session_id })),
        )
    }

    /// Create session/prompt request
    pub fn create_session_prompt_request(
        &self,
        session_id: &str,
        input: &str,
        options: &PromptOptions,
    ) -> JsonRpcRequest {
        let mut params = serde_json::json!({
            "sessionId": session_id,
            "input": input,
        });
        if let Some(mode) = &options.mode {
            params["mode"] = serde_json::json!(mode);
        }
        if !options.attachments.is_empty() {
            params["attachments"] = serde_json::json!(options.attachments);
        }
        JsonRpcRequest::new(self.next_id(), "session/prompt", Some(params))
    }

    /// Create the cheap health probe request
    pub fn create_ping_request(&self) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id(), "ping", Some(serde_json::json!({})))
    }

    /// Unwrap a response's result, converting remote errors
    pub fn expect_result(&self, response: &JsonRpcResponse) -> Result<serde_json::Value> {
        if let Some(error) = &response.error {
            return Err(Error::Acp(AcpError::Remote {
                code: error.code,
                message: error.message.clone(),
            }));
        }
        response.result.clone().ok_or_else(|| {
            Error::Acp(AcpError::InvalidMessage(
                "Missing result in response".to_string(),
            ))
        })
    }

    /// Parse an incoming frame by shape
    pub fn parse_message(&self, value: &serde_json::Value) -> Result<AcpMessage> {
        // Response: has "id" plus "result" or "error"
        if value.get("id").is_some()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            let response: JsonRpcResponse = serde_json::from_value(value.clone())?;
            return Ok(AcpMessage::Response(response));
        }

        // Notification: has "method" but no "id"
        if value.get("method").is_some() && value.get("id").is_none() {
            let method = value["method"].as_str().unwrap_or("").to_string();
            let params = value.get("params").cloned().unwrap_or(serde_json::Value::Null);
            debug!("Notification: {}", method);
            return Ok(AcpMessage::Notification { method, params });
        }

        // Provider-originated request (approval prompts): "method" and "id"
        if value.get("method").is_some() && value.get("id").is_some() {
            let request: JsonRpcRequest = serde_json::from_value(value.clone())?;
            return Ok(AcpMessage::ProviderRequest(request));
        }

        warn!("Unclassifiable frame: {}", value);
        Ok(AcpMessage::Unknown(value.clone()))
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed ACP frame types
#[derive(Debug, Clone)]
pub enum AcpMessage {
    /// Response to one of our requests
    Response(JsonRpcResponse),
    /// Provider notification (session updates, deltas)
    Notification {
        method: String,
        params: serde_json::Value,
    },
    /// Request originated by the provider (permission prompts)
    ProviderRequest(JsonRpcRequest),
    /// Anything else; logged, never fatal
    Unknown(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_monotonic() {
        let handler = ProtocolHandler::new();
        assert_eq!(handler.next_id(), 1);
        assert_eq!(handler.next_id(), 2);
        assert_eq!(handler.next_id(), 3);
    }

    #[test]
    fn test_create_initialize_request() {
        let handler = ProtocolHandler::new();
        let request = handler.create_initialize_request(serde_json::json!({"streaming": true}));

        assert_eq!(request.method, "initialize");
        let params = request.params.unwrap();
        assert_eq!(params["protocolVersion"], ACP_PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], "Orbit");
        assert_eq!(params["capabilities"]["streaming"], true);
    }

    #[test]
    fn test_session_list_request_with_cursor() {
        let handler = ProtocolHandler::new();
        let filters = SessionFilters {
            status: Some(crate::types::SessionStatus::Active),
            project: None,
        };
        let request = handler.create_session_list_request(Some("20"), &filters);

        let params = request.params.unwrap();
        assert_eq!(params["cursor"], "20");
        assert_eq!(params["filters"]["status"], "active");
    }

    #[test]
    fn test_parse_message_shapes() {
        let handler = ProtocolHandler::new();

        let response = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert!(matches!(
            handler.parse_message(&response).unwrap(),
            AcpMessage::Response(_)
        ));

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": {"sessionId": "s1"}
        });
        assert!(matches!(
            handler.parse_message(&notification).unwrap(),
            AcpMessage::Notification { .. }
        ));

        let provider_request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "session/request_permission",
            "params": {"sessionId": "s1"}
        });
        assert!(matches!(
            handler.parse_message(&provider_request).unwrap(),
            AcpMessage::ProviderRequest(_)
        ));

        let junk = serde_json::json!({"jsonrpc": "2.0"});
        assert!(matches!(
            handler.parse_message(&junk).unwrap(),
            AcpMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_expect_result_converts_remote_error() {
        let handler = ProtocolHandler::new();
        let response = JsonRpcResponse::failure(serde_json::json!(1), -32000, "busy");

        match handler.expect_result(&response) {
            Err(Error::Acp(AcpError::Remote { code, message })) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

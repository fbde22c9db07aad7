//! ACP client: JSON-RPC request/response/notification engine
//!
//! Owns the pending-request table and the per-session listener registry.
//! Neither structure is shared across adapters; each client instance is the
//! sole mutator of its own state.

use super::protocol::{AcpMessage, ProtocolHandler};
use super::transport::AcpTransport;
use crate::error::{AcpError, Error, Result};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, warn};

/// A provider notification delivered to listeners.
///
/// `rpc_id` is set when the provider sent this as a request that blocks
/// until a response (permission prompts); the eventual human decision must
/// be echoed back with exactly this id.
#[derive(Debug, Clone)]
pub struct AcpNotification {
    pub method: String,
    pub params: serde_json::Value,
    pub rpc_id: Option<serde_json::Value>,
}

impl AcpNotification {
    /// Session id carried in the params, if any
    pub fn session_id(&self) -> Option<&str> {
        self.params.get("sessionId").and_then(|v| v.as_str())
    }
}

type ListenerMap = HashMap<uuid::Uuid, mpsc::UnboundedSender<AcpNotification>>;

/// Per-session and catch-all notification listeners.
///
/// Registration and removal are O(1) map operations. Dispatch clones the
/// senders under the read lock and sends after releasing it, so listeners
/// can be added or removed while a dispatch for the same session is in
/// flight.
#[derive(Default)]
struct ListenerRegistry {
    sessions: SyncRwLock<HashMap<String, ListenerMap>>,
    catch_all: SyncRwLock<ListenerMap>,
}

impl ListenerRegistry {
    fn add_session(
        &self,
        session_id: &str,
    ) -> (uuid::Uuid, mpsc::UnboundedReceiver<AcpNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4();
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    fn remove_session(&self, session_id: &str, id: uuid::Uuid) {
        let mut sessions = self.sessions.write();
        if let Some(map) = sessions.get_mut(session_id) {
            map.remove(&id);
            if map.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    fn add_catch_all(&self) -> (uuid::Uuid, mpsc::UnboundedReceiver<AcpNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4();
        self.catch_all.write().insert(id, tx);
        (id, rx)
    }

    fn remove_catch_all(&self, id: uuid::Uuid) {
        self.catch_all.write().remove(&id);
    }

    fn dispatch(&self, notification: AcpNotification) {
        let mut targets: Vec<mpsc::UnboundedSender<AcpNotification>> = Vec::new();

        if let Some(session_id) = notification.session_id() {
            let sessions = self.sessions.read();
            if let Some(map) = sessions.get(session_id) {
                targets.extend(map.values().cloned());
            }
        }
        {
            let catch_all = self.catch_all.read();
            targets.extend(catch_all.values().cloned());
        }

        // Locks released; sending cannot block and cannot race a removal.
        for tx in targets {
            let _ = tx.send(notification.clone());
        }
    }
}

/// JSON-RPC client over a provider transport
pub struct AcpClient {
    protocol: ProtocolHandler,
    transport: Arc<dyn AcpTransport>,
    /// Pending requests (request id -> response channel)
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    listeners: Arc<ListenerRegistry>,
    /// Capabilities advertised by the provider during initialize
    advertised: RwLock<Option<serde_json::Value>>,
    _message_task: tokio::task::JoinHandle<()>,
}

impl AcpClient {
    pub fn new(transport: Arc<dyn AcpTransport>) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let listeners = Arc::new(ListenerRegistry::default());

        let message_task = tokio::spawn(Self::message_loop(
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&listeners),
        ));

        Self {
            protocol: ProtocolHandler::new(),
            transport,
            pending,
            listeners,
            advertised: RwLock::new(None),
            _message_task: message_task,
        }
    }

    pub fn protocol(&self) -> &ProtocolHandler {
        &self.protocol
    }

    /// Perform the initialize handshake, recording advertised capabilities.
    ///
    /// The reply is treated leniently: a version mismatch downgrades to a
    /// warning because the real provider sequence is not yet confirmed.
    pub async fn initialize(
        &self,
        declared: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let request = self.protocol.create_initialize_request(declared);
        let response = self.send_request(request, timeout).await?;
        let result = self.protocol.expect_result(&response)?;

        if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_u64()) {
            if version != crate::types::ACP_PROTOCOL_VERSION as u64 {
                warn!(
                    "Protocol version mismatch: expected {}, got {}",
                    crate::types::ACP_PROTOCOL_VERSION,
                    version
                );
            }
        }

        let mut advertised = self.advertised.write().await;
        *advertised = Some(result.clone());
        Ok(result)
    }

    /// Capabilities advertised during initialize, if the handshake ran
    pub async fn advertised_capabilities(&self) -> Option<serde_json::Value> {
        self.advertised.read().await.clone()
    }

    /// Send a request and await the matching response.
    ///
    /// The pending entry is removed on resolve, on timeout, and on send
    /// failure; a response arriving after the timeout finds no entry and is
    /// dropped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest::new(self.protocol.next_id(), method, params);
        self.send_request(request, timeout).await
    }

    /// Send a prebuilt request (from [`ProtocolHandler`] builders)
    pub async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let request_id = request
            .id
            .as_ref()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::Acp(AcpError::InvalidMessage("Request missing ID".to_string())))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id, tx);
        }

        let json = serde_json::to_string(&request)?;
        if let Err(e) = self.transport.send_line(json).await {
            let mut pending = self.pending.lock().await;
            pending.remove(&request_id);
            return Err(e);
        }

        debug!("Request {} ({}) sent, awaiting response", request_id, request.method);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Acp(AcpError::ConnectionFailed(
                "Response channel closed".to_string(),
            ))),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&request_id);
                Err(Error::Acp(AcpError::Timeout))
            }
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let request = JsonRpcRequest::notification(method, params);
        self.transport.send_line(serde_json::to_string(&request)?).await
    }

    /// Echo a response for a provider-originated request.
    ///
    /// `rpc_id` must be the value received on the [`AcpNotification`],
    /// unmodified; this is what unblocks the provider's permission prompt.
    pub async fn respond(&self, rpc_id: serde_json::Value, result: serde_json::Value) -> Result<()> {
        let response = JsonRpcResponse::success(rpc_id, result);
        self.transport.send_line(serde_json::to_string(&response)?).await
    }

    /// Subscribe to notifications for one session
    pub fn listen_session(
        &self,
        session_id: &str,
    ) -> (uuid::Uuid, mpsc::UnboundedReceiver<AcpNotification>) {
        self.listeners.add_session(session_id)
    }

    pub fn unlisten_session(&self, session_id: &str, id: uuid::Uuid) {
        self.listeners.remove_session(session_id, id);
    }

    /// Subscribe to every notification regardless of session
    pub fn listen_all(&self) -> (uuid::Uuid, mpsc::UnboundedReceiver<AcpNotification>) {
        self.listeners.add_catch_all()
    }

    pub fn unlisten_all(&self, id: uuid::Uuid) {
        self.listeners.remove_catch_all(id);
    }

    /// Message processing loop
    async fn message_loop(
        transport: Arc<dyn AcpTransport>,
        pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
        listeners: Arc<ListenerRegistry>,
    ) {
        let protocol = ProtocolHandler::new();
        let mut buffer = String::new();

        loop {
            let line = match transport.recv_line().await {
                Some(line) => line,
                None => {
                    debug!("Transport closed");
                    listeners.dispatch(AcpNotification {
                        method: "transport/closed".to_string(),
                        params: serde_json::Value::Null,
                        rpc_id: None,
                    });
                    break;
                }
            };

            // Accumulate for multi-line JSON
            if buffer.is_empty() {
                buffer.push_str(&line);
            } else {
                buffer.push('\n');
                buffer.push_str(&line);
            }

            if buffer.len() > 1024 * 1024 {
                warn!("Dropping oversized stdout buffer ({} bytes)", buffer.len());
                buffer.clear();
                continue;
            }

            let value = match serde_json::from_str::<serde_json::Value>(&buffer) {
                Ok(v) => {
                    buffer.clear();
                    v
                }
                Err(e) if e.is_eof() => continue,
                Err(e) => {
                    let snippet = buffer.chars().take(300).collect::<String>();
                    debug!("Ignoring non-JSON provider output ({}): {}", e, snippet);
                    buffer.clear();
                    continue;
                }
            };

            match protocol.parse_message(&value) {
                Ok(AcpMessage::Response(response)) => {
                    if let Some(id) = response.id.as_ref().and_then(|v| v.as_u64()) {
                        let mut pending = pending.lock().await;
                        if let Some(tx) = pending.remove(&id) {
                            debug!("Delivering response for request {}", id);
                            let _ = tx.send(response);
                        } else {
                            warn!("Received response for unknown request: {}", id);
                        }
                    }
                }
                Ok(AcpMessage::Notification { method, params }) => {
                    listeners.dispatch(AcpNotification {
                        method,
                        params,
                        rpc_id: None,
                    });
                }
                Ok(AcpMessage::ProviderRequest(request)) => {
                    debug!("Provider request: {}", request.method);
                    listeners.dispatch(AcpNotification {
                        method: request.method,
                        params: request.params.unwrap_or(serde_json::Value::Null),
                        rpc_id: request.id,
                    });
                }
                Ok(AcpMessage::Unknown(value)) => {
                    warn!("Unknown message: {:?}", value);
                }
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::transport::testing::PipeTransport;
    use serde_json::json;

    fn client_with_pipe() -> (AcpClient, crate::acp::transport::testing::PipeTransportHandle) {
        let (transport, handle) = PipeTransport::new();
        (AcpClient::new(Arc::new(transport)), handle)
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (client, mut handle) = client_with_pipe();

        let pending = tokio::spawn(async move {
            client
                .request("session/list", Some(json!({})), Duration::from_secs(1))
                .await
        });

        let sent = handle.outbound_rx.recv().await.unwrap();
        let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(request["method"], "session/list");
        let id = request["id"].clone();

        handle
            .inbound_tx
            .send(json!({"jsonrpc": "2.0", "id": id, "result": {"sessions": []}}).to_string())
            .unwrap();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.result.unwrap()["sessions"], json!([]));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_and_drops_late_response() {
        let (client, mut handle) = client_with_pipe();

        let result = client
            .request("slow/op", None, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(Error::Acp(AcpError::Timeout))));
        assert!(client.pending.lock().await.is_empty());

        // A late response for the timed-out id must be dropped, not panic
        // and not resolve anything.
        let sent = handle.outbound_rx.recv().await.unwrap();
        let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
        handle
            .inbound_tx
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}).to_string())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_reaches_session_and_catch_all() {
        let (client, handle) = client_with_pipe();

        let (_sid, mut session_rx) = client.listen_session("s1");
        let (_cid, mut all_rx) = client.listen_all();
        let (_other, mut other_rx) = client.listen_session("s2");

        handle
            .inbound_tx
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "method": "session/update",
                    "params": {"sessionId": "s1", "delta": "hi"}
                })
                .to_string(),
            )
            .unwrap();

        let n = session_rx.recv().await.unwrap();
        assert_eq!(n.method, "session/update");
        assert_eq!(n.session_id(), Some("s1"));

        let n = all_rx.recv().await.unwrap();
        assert_eq!(n.params["delta"], "hi");

        // The listener for a different session sees nothing.
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_removal_during_dispatch_is_safe() {
        let (client, handle) = client_with_pipe();

        let (id, mut rx) = client.listen_session("s1");
        client.unlisten_session("s1", id);
        // Removing twice is harmless.
        client.unlisten_session("s1", id);

        handle
            .inbound_tx
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "method": "session/update",
                    "params": {"sessionId": "s1"}
                })
                .to_string(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_provider_request_carries_rpc_id() {
        let (client, handle) = client_with_pipe();
        let (_id, mut rx) = client.listen_session("s1");

        handle
            .inbound_tx
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "id": 77,
                    "method": "session/request_permission",
                    "params": {"sessionId": "s1", "toolCallId": "t1"}
                })
                .to_string(),
            )
            .unwrap();

        let n = rx.recv().await.unwrap();
        assert_eq!(n.rpc_id, Some(json!(77)));
    }

    #[tokio::test]
    async fn test_respond_echoes_rpc_id_verbatim() {
        let (client, mut handle) = client_with_pipe();

        client
            .respond(json!("req-abc"), json!({"outcome": "allow_once"}))
            .await
            .unwrap();

        let sent = handle.outbound_rx.recv().await.unwrap();
        let response: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(response["id"], json!("req-abc"));
        assert_eq!(response["result"]["outcome"], "allow_once");
    }

    #[tokio::test]
    async fn test_unmatched_response_is_not_fatal() {
        let (client, mut handle) = client_with_pipe();

        handle
            .inbound_tx
            .send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}).to_string())
            .unwrap();

        // The loop keeps running: a later request still round-trips.
        let client = Arc::new(client);
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request("session/list", Some(json!({})), Duration::from_secs(1))
                    .await
            })
        };

        let sent = handle.outbound_rx.recv().await.unwrap();
        let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
        handle
            .inbound_tx
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}).to_string())
            .unwrap();

        assert!(pending.await.unwrap().is_ok());
        assert!(client.pending.lock().await.is_empty());
    }
}

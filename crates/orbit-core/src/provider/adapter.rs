//! Provider adapter contract and the ACP-backed implementation
//!
//! An adapter makes one agent backend pluggable: lifecycle, health,
//! session listing, prompts, and event subscriptions, all expressed in the
//! normalized model. `AcpProviderAdapter` composes a subprocess transport,
//! an [`AcpClient`], and a [`StreamNormalizer`].

use crate::acp::{AcpClient, AcpNotification, ProcessTransport};
use crate::error::{Error, ProviderError, Result, ValidationFailure};
use crate::normalize::StreamNormalizer;
use crate::provider::health::{find_executable, HealthMonitor};
use crate::provider::retry::{with_retry, DEFAULT_MAX_RETRIES};
use crate::provider::subscribers::SubscriberRegistry;
use crate::types::validate::{parse_timestamp, validate_metadata_value};
use crate::types::{
    HealthReport, HealthState, NormalizedEvent, NormalizedSession, PromptOptions, PromptReceipt,
    PromptStatus, ProviderCapabilities, ProviderSettings, SessionFilters, SessionPage,
    SessionStatus, Subscription,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Contract every provider backend implements.
///
/// Capabilities are immutable once the adapter is constructed; operations
/// on undeclared capabilities fail fast without touching the transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Adapter-level capability surface
    fn capabilities(&self) -> ProviderCapabilities;

    /// Start the backing transport. Idempotent: repeated calls never spawn
    /// duplicate transports. Failure degrades to an unhealthy status
    /// rather than poisoning the registry.
    async fn start(&self) -> Result<()>;

    /// Stop the backing transport. Safe even if never started.
    async fn stop(&self) -> Result<()>;

    async fn health(&self) -> HealthReport;

    async fn list_sessions(
        &self,
        cursor: Option<String>,
        filters: SessionFilters,
    ) -> Result<SessionPage>;

    async fn open_session(&self, session_id: &str) -> Result<NormalizedSession>;

    async fn send_prompt(
        &self,
        session_id: &str,
        input: &str,
        options: PromptOptions,
    ) -> Result<PromptReceipt>;

    /// Open a channel-based subscription to a session's normalized events
    fn subscribe(&self, session_id: &str) -> Result<Subscription>;

    /// Idempotent; sibling subscriptions are untouched
    fn unsubscribe(&self, subscription: &Subscription);

    /// One-shot normalization for adapters that do not stream deltas
    fn normalize_event(&self, raw: Value) -> NormalizedEvent;

    /// Echo a human approval decision back to the provider, with the
    /// `rpc_id` from the approval payload unmodified.
    async fn respond_approval(&self, rpc_id: Value, option_id: &str) -> Result<()>;
}

/// Live transport state, present only between start() and stop()
struct AdapterRuntime {
    client: Arc<AcpClient>,
    child: Option<Arc<Mutex<tokio::process::Child>>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl AdapterRuntime {
    async fn is_alive(&self) -> bool {
        match &self.child {
            None => true,
            Some(child) => {
                let mut child = child.lock().await;
                matches!(child.try_wait(), Ok(None))
            }
        }
    }
}

/// Adapter for any backend speaking ACP over a subprocess
pub struct AcpProviderAdapter {
    id: String,
    name: String,
    default_command: String,
    settings: ProviderSettings,
    capabilities: ProviderCapabilities,
    runtime: Mutex<Option<AdapterRuntime>>,
    subscribers: Arc<SubscriberRegistry>,
    health: HealthMonitor,
    oneshot: parking_lot::Mutex<StreamNormalizer>,
}

impl AcpProviderAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        default_command: impl Into<String>,
        settings: ProviderSettings,
        capabilities: ProviderCapabilities,
    ) -> Self {
        let id = id.into();
        let (oneshot, _discarded) = StreamNormalizer::new(id.clone());
        Self {
            id,
            name: name.into(),
            default_command: default_command.into(),
            settings,
            capabilities,
            runtime: Mutex::new(None),
            subscribers: SubscriberRegistry::new(),
            health: HealthMonitor::new(),
            oneshot: parking_lot::Mutex::new(oneshot),
        }
    }

    fn command(&self) -> &str {
        self.settings.extra_str("command", &self.default_command)
    }

    fn command_args(&self) -> Vec<String> {
        self.settings
            .extra
            .get("args")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn command_env(&self) -> HashMap<String, String> {
        self.settings
            .extra
            .get("env")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn max_retries(&self) -> u32 {
        self.settings.extra_u64("maxRetries", DEFAULT_MAX_RETRIES as u64) as u32
    }

    fn require(&self, flag: bool, capability: &str) -> Result<()> {
        if flag {
            Ok(())
        } else {
            Err(Error::Provider(ProviderError::CapabilityNotSupported(
                capability.to_string(),
            )))
        }
    }

    async fn client(&self) -> Result<Arc<AcpClient>> {
        let runtime = self.runtime.lock().await;
        runtime
            .as_ref()
            .map(|rt| Arc::clone(&rt.client))
            .ok_or_else(|| Error::Provider(ProviderError::NotStarted(self.id.clone())))
    }

    /// Pump raw notifications through the normalizer and fan flushed events
    /// out to subscribers in flush order.
    fn spawn_pump(&self, client: &Arc<AcpClient>) -> Vec<tokio::task::JoinHandle<()>> {
        let (_listener, mut notifications) = client.listen_all();
        let (mut normalizer, mut events) = StreamNormalizer::new(self.id.clone());

        let ingest = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                if notification.method == "transport/closed" {
                    break;
                }
                normalizer.ingest(&notification);
            }
            debug!("Notification pump ended");
        });

        let subscribers = Arc::clone(&self.subscribers);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                subscribers.dispatch(event);
            }
        });

        vec![ingest, dispatch]
    }

    /// Translate one raw provider session entry, reporting every violated
    /// field at once.
    fn normalize_session(
        &self,
        raw: &Value,
    ) -> std::result::Result<NormalizedSession, ValidationFailure> {
        let mut failure = ValidationFailure::new();

        let session_id = match raw.get("sessionId") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(_) => {
                failure.push("sessionId", "must be a non-empty string");
                String::new()
            }
            None => {
                failure.push("sessionId", "missing");
                String::new()
            }
        };

        let status = match raw.get("status") {
            None => SessionStatus::Idle,
            Some(Value::String(s)) => SessionStatus::parse(s).unwrap_or_else(|| {
                failure.push("status", format!("unknown status '{}'", s));
                SessionStatus::Idle
            }),
            Some(_) => {
                failure.push("status", "must be a string");
                SessionStatus::Idle
            }
        };

        let created_at = parse_timestamp("createdAt", raw.get("createdAt"), &mut failure)
            .unwrap_or_else(chrono::Utc::now);
        let updated_at = parse_timestamp("updatedAt", raw.get("updatedAt"), &mut failure)
            .unwrap_or(created_at);

        let metadata = match raw.get("metadata") {
            None => None,
            Some(value) => match validate_metadata_value(value) {
                Ok(()) => value.as_object().cloned(),
                Err(nested) => {
                    for e in nested.errors {
                        failure.push(e.field, e.reason);
                    }
                    None
                }
            },
        };

        // A session may narrow the adapter surface, never widen it.
        let capabilities = match raw.get("capabilities") {
            Some(value) => match serde_json::from_value::<ProviderCapabilities>(value.clone()) {
                Ok(requested) => self.capabilities.narrow(&requested),
                Err(e) => {
                    failure.push("capabilities", format!("malformed: {}", e));
                    self.capabilities.clone()
                }
            },
            None => self.capabilities.clone(),
        };

        failure.into_result()?;

        Ok(NormalizedSession {
            provider_id: self.id.clone(),
            title: raw
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or(&session_id)
                .to_string(),
            project: raw
                .get("project")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            preview: raw
                .get("preview")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            session_id,
            status,
            created_at,
            updated_at,
            capabilities,
            metadata,
            raw: raw.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) async fn install_test_client(&self, client: Arc<AcpClient>) {
        let tasks = self.spawn_pump(&client);
        let mut runtime = self.runtime.lock().await;
        *runtime = Some(AdapterRuntime {
            client,
            child: None,
            tasks,
        });
    }
}

#[async_trait]
impl ProviderAdapter for AcpProviderAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;

        if let Some(rt) = runtime.as_ref() {
            if rt.is_alive().await {
                debug!("Provider {} already running", self.id);
                return Ok(());
            }
            warn!("Provider {} process died, respawning", self.id);
        }

        let command = self.command().to_string();
        let executable = find_executable(&command).ok_or_else(|| {
            self.health
                .mark_unhealthy(format!("executable '{}' not found", command));
            Error::Provider(ProviderError::StartFailed(format!(
                "executable '{}' not found",
                command
            )))
        })?;

        info!("Starting provider {} ({})", self.id, executable.display());

        let args = self.command_args();
        let env = self.command_env();
        let cwd = self.settings.extra.get("cwd").and_then(|v| v.as_str());

        let (transport, child) =
            ProcessTransport::spawn(&executable.to_string_lossy(), &args, &env, cwd)
                .await
                .map_err(|e| {
                    self.health.mark_unhealthy(format!("spawn failed: {}", e));
                    e
                })?;

        let client = Arc::new(AcpClient::new(Arc::new(transport)));

        // Handshake failures degrade rather than abort: the transport is
        // up, so the provider stays usable for backends that skip the
        // initialize round-trip.
        let declared = serde_json::to_value(&self.capabilities).unwrap_or_default();
        if let Err(e) = client.initialize(declared, INIT_TIMEOUT).await {
            warn!("Provider {} initialize failed: {}", self.id, e);
            self.health.record_failure(format!("initialize failed: {}", e));
        }

        let tasks = self.spawn_pump(&client);
        *runtime = Some(AdapterRuntime {
            client,
            child: Some(Arc::new(Mutex::new(child))),
            tasks,
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(rt) = runtime.take() else {
            debug!("Provider {} was never started", self.id);
            return Ok(());
        };

        info!("Stopping provider {}", self.id);
        for task in rt.tasks {
            task.abort();
        }
        if let Some(child) = rt.child {
            let mut child = child.lock().await;
            if let Err(e) = child.kill().await {
                warn!("Failed to kill provider {}: {}", self.id, e);
            }
        }
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        if !self.settings.enabled {
            return HealthReport::new(HealthState::Disabled, "provider disabled");
        }

        let runtime = self.runtime.lock().await;
        match runtime.as_ref() {
            None => {
                // Not started: executable discoverability is the only signal.
                let command = self.command();
                if find_executable(command).is_none() {
                    self.health
                        .mark_unhealthy(format!("executable '{}' not found", command));
                }
                self.health.report().with_detail("command", command)
            }
            Some(rt) => {
                if !rt.is_alive().await {
                    self.health.mark_unhealthy("provider process exited");
                    return self.health.report();
                }

                let request = rt.client.protocol().create_ping_request();
                let started = std::time::Instant::now();
                match rt.client.send_request(request, PROBE_TIMEOUT).await {
                    Ok(response) if response.error.is_none() => {
                        self.health.record_success(started.elapsed());
                    }
                    Ok(response) => {
                        let message = response
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "unknown".to_string());
                        self.health.record_failure(format!("probe error: {}", message));
                    }
                    Err(e) => {
                        self.health.record_failure(format!("probe failed: {}", e));
                    }
                }
                self.health.report()
            }
        }
    }

    async fn list_sessions(
        &self,
        cursor: Option<String>,
        filters: SessionFilters,
    ) -> Result<SessionPage> {
        self.require(self.capabilities.list_sessions, "listSessions")?;
        if cursor.is_some() {
            self.require(self.capabilities.pagination, "pagination")?;
        }
        if !filters.is_empty() {
            self.require(self.capabilities.filtering, "filtering")?;
        }

        let client = self.client().await?;
        let request = client
            .protocol()
            .create_session_list_request(cursor.as_deref(), &filters);
        let response = client.send_request(request, REQUEST_TIMEOUT).await?;
        let result = client.protocol().expect_result(&response)?;

        let mut sessions = Vec::new();
        for entry in result
            .get("sessions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
        {
            match self.normalize_session(&entry) {
                Ok(session) => sessions.push(session),
                Err(failure) => {
                    warn!("Skipping malformed session from {}: {}", self.id, failure);
                }
            }
        }

        Ok(SessionPage {
            sessions,
            next_cursor: result
                .get("nextCursor")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    async fn open_session(&self, session_id: &str) -> Result<NormalizedSession> {
        self.require(self.capabilities.open_session, "openSession")?;

        let client = self.client().await?;
        let request = client.protocol().create_session_open_request(session_id);
        let response = client.send_request(request, REQUEST_TIMEOUT).await?;
        let result = client.protocol().expect_result(&response)?;

        self.normalize_session(&result)
            .map_err(|failure| Error::Validation(failure))
    }

    async fn send_prompt(
        &self,
        session_id: &str,
        input: &str,
        options: PromptOptions,
    ) -> Result<PromptReceipt> {
        self.require(self.capabilities.send_prompt, "sendPrompt")?;

        let client = self.client().await?;
        let response = with_retry("send_prompt", self.max_retries(), || {
            // A fresh request id per attempt; a stale id would collide
            // with the timed-out entry's late response.
            let request = client
                .protocol()
                .create_session_prompt_request(session_id, input, &options);
            let client = Arc::clone(&client);
            async move {
                let response = client.send_request(request, REQUEST_TIMEOUT).await?;
                client.protocol().expect_result(&response)
            }
        })
        .await?;

        let turn_id = response
            .get("turnId")
            .or_else(|| response.get("requestId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::Acp(crate::error::AcpError::InvalidMessage(
                    "prompt response missing turnId/requestId".to_string(),
                ))
            })?
            .to_string();

        let status = response
            .get("status")
            .and_then(|v| serde_json::from_value::<PromptStatus>(v.clone()).ok())
            .unwrap_or(PromptStatus::Accepted);

        Ok(PromptReceipt { turn_id, status })
    }

    fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        self.require(self.capabilities.streaming, "streaming")?;
        Ok(self.subscribers.subscribe(&self.id, session_id))
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers
            .remove(&subscription.session_id, subscription.id);
    }

    fn normalize_event(&self, raw: Value) -> NormalizedEvent {
        let notification = AcpNotification {
            method: raw
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            params: raw.get("params").cloned().unwrap_or(raw.clone()),
            rpc_id: raw.get("id").cloned(),
        };
        self.oneshot.lock().normalize_one(&notification)
    }

    async fn respond_approval(&self, rpc_id: Value, option_id: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .respond(
                rpc_id,
                serde_json::json!({"outcome": "selected", "optionId": option_id}),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::testing::PipeTransport;
    use crate::types::EventCategory;
    use serde_json::json;

    fn adapter_with(capabilities: ProviderCapabilities) -> AcpProviderAdapter {
        AcpProviderAdapter::new(
            "acp-test",
            "Test Provider",
            "acp-test-agent",
            ProviderSettings::default(),
            capabilities,
        )
    }

    async fn started_adapter(
        capabilities: ProviderCapabilities,
    ) -> (
        Arc<AcpProviderAdapter>,
        crate::acp::testing::PipeTransportHandle,
    ) {
        let adapter = Arc::new(adapter_with(capabilities));
        let (transport, handle) = PipeTransport::new();
        adapter
            .install_test_client(Arc::new(AcpClient::new(Arc::new(transport))))
            .await;
        (adapter, handle)
    }

    /// Answer the next outbound request with `result`
    async fn respond_next(
        handle: &mut crate::acp::testing::PipeTransportHandle,
        result: Value,
    ) -> Value {
        let sent = handle.outbound_rx.recv().await.unwrap();
        let request: Value = serde_json::from_str(&sent).unwrap();
        handle
            .inbound_tx
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string())
            .unwrap();
        request
    }

    #[tokio::test]
    async fn test_capability_gate_fails_fast() {
        let adapter = adapter_with(ProviderCapabilities {
            send_prompt: true,
            ..Default::default()
        });

        // Never started, but the capability error comes first.
        let result = adapter.list_sessions(None, SessionFilters::default()).await;
        match result {
            Err(Error::Provider(ProviderError::CapabilityNotSupported(cap))) => {
                assert_eq!(cap, "listSessions");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pagination_gated_separately() {
        let (adapter, _handle) = started_adapter(ProviderCapabilities {
            list_sessions: true,
            ..Default::default()
        })
        .await;

        let result = adapter
            .list_sessions(Some("10".to_string()), SessionFilters::default())
            .await;
        match result {
            Err(Error::Provider(ProviderError::CapabilityNotSupported(cap))) => {
                assert_eq!(cap, "pagination");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_sessions_normalizes_and_skips_malformed() {
        let (adapter, mut handle) = started_adapter(ProviderCapabilities::full()).await;

        let task = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                adapter.list_sessions(None, SessionFilters::default()).await
            })
        };

        let request = respond_next(
            &mut handle,
            json!({
                "sessions": [
                    {
                        "sessionId": "s1",
                        "title": "Refactor parser",
                        "status": "active",
                        "createdAt": "2026-08-06T10:00:00Z",
                        "updatedAt": "2026-08-06T10:05:00Z",
                        "metadata": {"branch": "main"}
                    },
                    {"sessionId": "", "metadata": ["not", "a", "map"]}
                ],
                "nextCursor": "2"
            }),
        )
        .await;
        assert_eq!(request["method"], "session/list");

        let page = task.await.unwrap().unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session_id, "s1");
        assert_eq!(page.sessions[0].status, SessionStatus::Active);
        assert_eq!(page.sessions[0].metadata.as_ref().unwrap()["branch"], json!("main"));
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_open_session_reports_all_violations() {
        let (adapter, mut handle) = started_adapter(ProviderCapabilities::full()).await;

        let task = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.open_session("s9").await })
        };

        respond_next(
            &mut handle,
            json!({
                "sessionId": 42,
                "createdAt": "not-a-timestamp",
                "metadata": null
            }),
        )
        .await;

        match task.await.unwrap() {
            Err(Error::Validation(failure)) => {
                assert!(failure.contains_field("sessionId"));
                assert!(failure.contains_field("createdAt"));
                assert!(failure.contains_field("metadata"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_capabilities_narrow_not_widen() {
        let adapter_caps = ProviderCapabilities {
            list_sessions: true,
            open_session: true,
            send_prompt: true,
            ..Default::default()
        };
        let (adapter, mut handle) = started_adapter(adapter_caps).await;

        let task = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.open_session("s1").await })
        };

        // The session claims streaming, which the adapter never declared.
        respond_next(
            &mut handle,
            json!({
                "sessionId": "s1",
                "capabilities": {"streaming": true, "sendPrompt": true}
            }),
        )
        .await;

        let session = task.await.unwrap().unwrap();
        assert!(!session.capabilities.streaming);
        assert!(session.capabilities.send_prompt);
        assert!(!session.capabilities.list_sessions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_prompt_retries_transient_then_succeeds() {
        let (adapter, mut handle) = started_adapter(ProviderCapabilities::full()).await;

        let task = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                adapter
                    .send_prompt("s1", "run the tests", PromptOptions::default())
                    .await
            })
        };

        // First two attempts: transient "busy" errors.
        for _ in 0..2 {
            let sent = handle.outbound_rx.recv().await.unwrap();
            let request: Value = serde_json::from_str(&sent).unwrap();
            assert_eq!(request["method"], "session/prompt");
            handle
                .inbound_tx
                .send(
                    json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": {"code": -32000, "message": "agent busy"}
                    })
                    .to_string(),
                )
                .unwrap();
        }

        // Third attempt succeeds.
        respond_next(&mut handle, json!({"turnId": "turn-7", "status": "streaming"})).await;

        let receipt = task.await.unwrap().unwrap();
        assert_eq!(receipt.turn_id, "turn-7");
        assert_eq!(receipt.status, PromptStatus::Streaming);
    }

    #[tokio::test]
    async fn test_send_prompt_non_transient_fails_once() {
        let (adapter, mut handle) = started_adapter(ProviderCapabilities::full()).await;

        let task = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                adapter
                    .send_prompt("s1", "run the tests", PromptOptions::default())
                    .await
            })
        };

        let sent = handle.outbound_rx.recv().await.unwrap();
        let request: Value = serde_json::from_str(&sent).unwrap();
        handle
            .inbound_tx
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": {"code": -32602, "message": "invalid params"}
                })
                .to_string(),
            )
            .unwrap();

        match task.await.unwrap() {
            Err(Error::Acp(crate::error::AcpError::Remote { code, .. })) => {
                assert_eq!(code, -32602);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // No second request was attempted.
        assert!(handle.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_streams_normalized_events() {
        let (adapter, handle) = started_adapter(ProviderCapabilities::full()).await;
        let mut subscription = adapter.subscribe("s1").unwrap();

        for chunk in ["Reading ", "the diff"] {
            handle
                .inbound_tx
                .send(
                    json!({
                        "jsonrpc": "2.0",
                        "method": "session/update",
                        "params": {
                            "sessionId": "s1",
                            "sessionUpdate": "agent_thought_chunk",
                            "turnId": "t1",
                            "content": {"type": "text", "text": chunk}
                        }
                    })
                    .to_string(),
                )
                .unwrap();
        }
        handle
            .inbound_tx
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "method": "session/update",
                    "params": {"sessionId": "s1", "sessionUpdate": "turn_complete"}
                })
                .to_string(),
            )
            .unwrap();

        let event = subscription.events.recv().await.unwrap();
        assert_eq!(event.category, EventCategory::Reasoning);
        assert_eq!(event.text.as_deref(), Some("Reading the diff"));
        assert_eq!(event.provider_id, "acp-test");
    }

    #[tokio::test]
    async fn test_subscribe_requires_streaming_capability() {
        let adapter = adapter_with(ProviderCapabilities {
            send_prompt: true,
            ..Default::default()
        });
        assert!(matches!(
            adapter.subscribe("s1"),
            Err(Error::Provider(ProviderError::CapabilityNotSupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_respond_approval_echoes_rpc_id() {
        let (adapter, mut handle) = started_adapter(ProviderCapabilities::full()).await;

        adapter
            .respond_approval(json!("rpc-55"), "allow")
            .await
            .unwrap();

        let sent = handle.outbound_rx.recv().await.unwrap();
        let response: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(response["id"], json!("rpc-55"));
        assert_eq!(response["result"]["optionId"], json!("allow"));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let adapter = adapter_with(ProviderCapabilities::full());
        assert!(adapter.stop().await.is_ok());
        assert!(adapter.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_start_unknown_executable_degrades_health() {
        let adapter = AcpProviderAdapter::new(
            "acp-missing",
            "Missing",
            "orbit-no-such-binary-xyz",
            ProviderSettings::default(),
            ProviderCapabilities::full(),
        );

        let result = adapter.start().await;
        assert!(matches!(
            result,
            Err(Error::Provider(ProviderError::StartFailed(_)))
        ));
        assert_eq!(adapter.health().await.state, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_normalize_event_one_shot() {
        let adapter = adapter_with(ProviderCapabilities::full());

        let event = adapter.normalize_event(json!({
            "method": "session/update",
            "params": {
                "sessionId": "s1",
                "sessionUpdate": "agent_message_chunk",
                "turnId": "t1",
                "content": {"type": "text", "text": "hello"}
            }
        }));

        assert_eq!(event.category, EventCategory::AgentMessage);
        assert_eq!(event.text.as_deref(), Some("hello"));
        assert_eq!(event.raw["params"]["sessionId"], json!("s1"));
    }
}

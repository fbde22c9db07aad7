//! Normalized event model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on a single token-usage field.
///
/// Provider payloads occasionally carry garbage counters; anything above
/// this is treated as corrupt and rejected at the validation boundary.
pub const TOKEN_CEILING: u64 = 1_000_000_000;

/// Closed set of event categories in the unified timeline.
///
/// The category fully determines how consumers interpret `payload`; the
/// normalizer, not consumers, is responsible for shape compliance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    UserMessage,
    AgentMessage,
    Reasoning,
    Plan,
    ToolCommand,
    FileDiff,
    ApprovalRequest,
    UserInputRequest,
    LifecycleStatus,
    Metadata,
}

impl EventCategory {
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

/// One entry in the unified event timeline.
///
/// The raw provider payload is mandatory and survives even partially failed
/// normalization so the original stream can always be replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub provider_id: String,
    pub session_id: String,
    /// Provider-supplied or generated (`"{session}#{seq}"`) identifier,
    /// unique and stable enough for ordering within a session
    pub id: String,
    pub category: EventCategory,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Optional parent forming a tree (cycles are a defect)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub raw: Value,
}

/// Token accounting attached to terminal events.
///
/// Derived, never authoritative; always reconstructible from raw events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TokenUsage {
    pub fn from_counts(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cost: None,
            model: None,
        }
    }
}

/// Decision options a provider may offer on a permission prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

/// One selectable option on an approval prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOption {
    pub option_id: String,
    pub kind: ApprovalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Payload of an `approval_request` event.
///
/// `rpc_id` correlates the provider's blocked JSON-RPC request with the
/// eventual human decision and must be echoed back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcpApprovalPayload {
    pub rpc_id: Value,
    pub tool_call_id: String,
    pub options: Vec<ApprovalOption>,
}

impl AcpApprovalPayload {
    pub fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map.clone())).ok()
    }
}

/// A live subscription to a session's normalized events.
///
/// Delivery is channel-based; drop or [`Subscription::cancel`] to stop.
/// Cancellation is idempotent and never affects sibling subscriptions on
/// the same session.
#[derive(Debug)]
pub struct Subscription {
    pub id: uuid::Uuid,
    pub provider_id: String,
    pub session_id: String,
    pub events: tokio::sync::mpsc::UnboundedReceiver<NormalizedEvent>,
    pub(crate) cancel: CancelHandle,
}

/// Opaque detach token held by a [`Subscription`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    pub(crate) session_id: String,
    pub(crate) subscription_id: uuid::Uuid,
    pub(crate) registry: std::sync::Weak<crate::provider::SubscriberRegistry>,
}

impl Subscription {
    /// Stop further deliveries. Safe to call more than once; a flush that
    /// was already queued may still arrive on the channel.
    pub fn cancel(&self) {
        if let Some(registry) = self.cancel.registry.upgrade() {
            registry.remove(&self.cancel.session_id, self.cancel.subscription_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

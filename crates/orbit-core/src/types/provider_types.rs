//! Provider capability, configuration, and health types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Feature flags declared by a provider adapter.
///
/// Declared once at adapter construction and consulted by the relay and the
/// UI to gate operations. A session carries its own copy which may narrow
/// (never widen) the adapter-level value.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    #[serde(default)]
    pub list_sessions: bool,
    #[serde(default)]
    pub open_session: bool,
    #[serde(default)]
    pub send_prompt: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub attachments: bool,
    #[serde(default)]
    pub approvals: bool,
    #[serde(default)]
    pub multi_turn: bool,
    #[serde(default)]
    pub filtering: bool,
    #[serde(default)]
    pub pagination: bool,
    /// Open extension map for provider-specific flags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ProviderCapabilities {
    /// Full capability surface, used by adapters whose transport supports
    /// the whole contract.
    pub fn full() -> Self {
        Self {
            list_sessions: true,
            open_session: true,
            send_prompt: true,
            streaming: true,
            attachments: true,
            approvals: true,
            multi_turn: true,
            filtering: true,
            pagination: true,
            extensions: BTreeMap::new(),
        }
    }

    /// Produce a session-level copy narrowed by `requested`.
    ///
    /// Each flag is the logical AND of both sides, so a session can drop
    /// adapter capabilities but never acquire ones the adapter lacks.
    /// Extensions survive only when present on both sides.
    pub fn narrow(&self, requested: &ProviderCapabilities) -> ProviderCapabilities {
        ProviderCapabilities {
            list_sessions: self.list_sessions && requested.list_sessions,
            open_session: self.open_session && requested.open_session,
            send_prompt: self.send_prompt && requested.send_prompt,
            streaming: self.streaming && requested.streaming,
            attachments: self.attachments && requested.attachments,
            approvals: self.approvals && requested.approvals,
            multi_turn: self.multi_turn && requested.multi_turn,
            filtering: self.filtering && requested.filtering,
            pagination: self.pagination && requested.pagination,
            extensions: self
                .extensions
                .iter()
                .filter(|(k, _)| requested.extensions.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Per-provider configuration consumed from external config loading.
///
/// Missing `extra` fields are defaults, never configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            extra: BTreeMap::new(),
        }
    }
}

impl ProviderSettings {
    /// Look up a string value in `extra`, falling back to `default`
    pub fn extra_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.extra
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }

    /// Look up a u64 value in `extra`, falling back to `default`
    pub fn extra_u64(&self, key: &str, default: u64) -> u64 {
        self.extra.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }
}

/// Provider health states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
    Disabled,
}

/// Health status with message and diagnostic details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: HealthState,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn new(state: HealthState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Filters accepted by `list_sessions`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<super::SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl SessionFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.project.is_none()
    }
}

/// One page of normalized sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<super::NormalizedSession>,
    /// Opaque cursor for the next page, absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of a `send_prompt` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReceipt {
    /// Provider-issued turn or request identifier
    pub turn_id: String,
    pub status: PromptStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Accepted,
    Streaming,
    Completed,
}

/// Options accepted by `send_prompt`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_never_widens() {
        let adapter = ProviderCapabilities {
            list_sessions: true,
            send_prompt: true,
            streaming: false,
            ..Default::default()
        };

        let mut requested = ProviderCapabilities::full();
        requested
            .extensions
            .insert("sandbox".to_string(), serde_json::json!(true));

        let session = adapter.narrow(&requested);
        assert!(session.list_sessions);
        assert!(session.send_prompt);
        // Adapter never had streaming, so the session cannot gain it
        assert!(!session.streaming);
        assert!(!session.approvals);
        // Extension absent on the adapter side does not survive
        assert!(session.extensions.is_empty());
    }

    #[test]
    fn test_narrow_can_drop_flags() {
        let adapter = ProviderCapabilities::full();
        let requested = ProviderCapabilities {
            send_prompt: true,
            ..Default::default()
        };

        let session = adapter.narrow(&requested);
        assert!(session.send_prompt);
        assert!(!session.list_sessions);
        assert!(!session.pagination);
    }

    #[test]
    fn test_settings_missing_extra_is_default() {
        let settings: ProviderSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.enabled);
        assert!(settings.extra.is_empty());
        assert_eq!(settings.extra_str("command", "acp-agent"), "acp-agent");
        assert_eq!(settings.extra_u64("timeoutMs", 30_000), 30_000);
    }

    #[test]
    fn test_settings_extra_lookup() {
        let settings: ProviderSettings = serde_json::from_value(serde_json::json!({
            "enabled": false,
            "extra": { "command": "claude", "timeoutMs": 5000 }
        }))
        .unwrap();

        assert!(!settings.enabled);
        assert_eq!(settings.extra_str("command", "x"), "claude");
        assert_eq!(settings.extra_u64("timeoutMs", 0), 5000);
    }
}

//! Normalized session model

use super::ProviderCapabilities;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session status in the unified timeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Completed,
    Error,
    Interrupted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}

/// A provider session translated into the unified model.
///
/// Created by an adapter's list/open operation, mutated only through
/// [`NormalizedSession::merge`], destroyed only by provider-side deletion.
/// The untranslated provider payload is always retained in `raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSession {
    pub provider_id: String,
    /// Opaque provider-scoped session identifier
    pub session_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub status: SessionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub capabilities: ProviderCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Original provider payload, kept for debugging and replay
    pub raw: Value,
}

/// Fields applied by [`NormalizedSession::merge`]
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub status: Option<SessionStatus>,
    pub preview: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub raw: Option<Value>,
}

impl NormalizedSession {
    /// Apply an update, always refreshing `updated_at` to a strictly later
    /// instant and shallow-merging metadata keys.
    pub fn merge(&mut self, update: SessionUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(preview) = update.preview {
            self.preview = Some(preview);
        }
        if let Some(incoming) = update.metadata {
            let merged = self.metadata.get_or_insert_with(Map::new);
            for (key, value) in incoming {
                merged.insert(key, value);
            }
        }
        if let Some(raw) = update.raw {
            self.raw = raw;
        }

        // Clock skew or sub-millisecond merges must still move updated_at
        // forward, otherwise consumers cannot order revisions.
        let now = chrono::Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::milliseconds(1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_session() -> NormalizedSession {
        NormalizedSession {
            provider_id: "acp-claude".to_string(),
            session_id: "sess-1".to_string(),
            title: "Fix the flaky test".to_string(),
            project: Some("orbit".to_string()),
            status: SessionStatus::Active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            preview: None,
            capabilities: ProviderCapabilities::full(),
            metadata: None,
            raw: json!({"sessionId": "sess-1"}),
        }
    }

    #[test]
    fn test_merge_refreshes_updated_at_strictly() {
        let mut session = sample_session();
        let before = session.updated_at;

        session.merge(SessionUpdate::default());
        assert!(session.updated_at > before);

        // Even an immediate second merge must advance the timestamp
        let mid = session.updated_at;
        session.merge(SessionUpdate::default());
        assert!(session.updated_at > mid);
    }

    #[test]
    fn test_merge_shallow_merges_metadata() {
        let mut session = sample_session();

        let mut first = Map::new();
        first.insert("branch".to_string(), json!("main"));
        first.insert("dirty".to_string(), json!(true));
        session.merge(SessionUpdate {
            metadata: Some(first),
            ..Default::default()
        });

        let mut second = Map::new();
        second.insert("dirty".to_string(), json!(false));
        session.merge(SessionUpdate {
            metadata: Some(second),
            ..Default::default()
        });

        let metadata = session.metadata.as_ref().unwrap();
        assert_eq!(metadata["branch"], json!("main"));
        assert_eq!(metadata["dirty"], json!(false));
    }

    #[test]
    fn test_merge_keeps_raw_payload() {
        let mut session = sample_session();
        session.merge(SessionUpdate {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        });

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.raw["sessionId"], json!("sess-1"));
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Idle,
            SessionStatus::Completed,
            SessionStatus::Error,
            SessionStatus::Interrupted,
        ] {
            let s = serde_json::to_value(status).unwrap();
            assert_eq!(SessionStatus::parse(s.as_str().unwrap()), Some(status));
        }
        assert_eq!(SessionStatus::parse("running"), None);
    }
}

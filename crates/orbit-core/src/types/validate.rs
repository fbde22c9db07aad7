//! Boundary validation for the normalized model
//!
//! Malformed sessions and events are rejected before they reach consumers;
//! every violated field is reported in one pass.

use super::{NormalizedEvent, NormalizedSession, TOKEN_CEILING};
use crate::error::ValidationFailure;
use serde_json::Value;

/// Validate a normalized session before it leaves an adapter
pub fn validate_session(session: &NormalizedSession) -> Result<(), ValidationFailure> {
    let mut failure = ValidationFailure::new();

    if session.provider_id.trim().is_empty() {
        failure.push("providerId", "must be a non-empty string");
    }
    if session.session_id.trim().is_empty() {
        failure.push("sessionId", "must be a non-empty string");
    }
    if session.created_at > chrono::Utc::now() + chrono::Duration::days(1) {
        failure.push("createdAt", "timestamp is in the future");
    }
    if session.updated_at < session.created_at {
        failure.push("updatedAt", "must not precede createdAt");
    }
    if let Some(metadata) = &session.metadata {
        check_plain_map("metadata", metadata, &mut failure);
    }
    if session.raw.is_null() {
        failure.push("raw", "original provider payload must be retained");
    }

    failure.into_result()
}

/// Validate a raw session payload's metadata field before normalization.
///
/// Arrays, null, scalars, and objects nested with non-plain values are all
/// rejected; only a plain key-value map passes.
pub fn validate_metadata_value(value: &Value) -> Result<(), ValidationFailure> {
    let mut failure = ValidationFailure::new();
    match value {
        Value::Object(map) => check_plain_map("metadata", map, &mut failure),
        Value::Null => failure.push("metadata", "must be a plain key-value map, got null"),
        Value::Array(_) => failure.push("metadata", "must be a plain key-value map, got array"),
        other => failure.push(
            "metadata",
            format!("must be a plain key-value map, got {}", type_name(other)),
        ),
    }
    failure.into_result()
}

/// Validate a normalized event before it is emitted
pub fn validate_event(event: &NormalizedEvent) -> Result<(), ValidationFailure> {
    let mut failure = ValidationFailure::new();

    if event.provider_id.trim().is_empty() {
        failure.push("providerId", "must be a non-empty string");
    }
    if event.session_id.trim().is_empty() {
        failure.push("sessionId", "must be a non-empty string");
    }
    if event.id.trim().is_empty() {
        failure.push("id", "must be a non-empty string");
    }
    if let Some(parent) = &event.parent_id {
        if parent == &event.id {
            failure.push("parentId", "event cannot be its own parent");
        }
    }
    if let Some(payload) = &event.payload {
        check_plain_map("payload", payload, &mut failure);
    }
    if let Some(usage) = &event.usage {
        if usage.prompt_tokens > TOKEN_CEILING {
            failure.push("usage.promptTokens", "exceeds sane upper bound");
        }
        if usage.completion_tokens > TOKEN_CEILING {
            failure.push("usage.completionTokens", "exceeds sane upper bound");
        }
        if usage.total_tokens > TOKEN_CEILING {
            failure.push("usage.totalTokens", "exceeds sane upper bound");
        }
    }
    if event.raw.is_null() {
        failure.push("raw", "original provider payload must be retained");
    }

    failure.into_result()
}

/// Parse an RFC 3339 timestamp field, recording a violation on failure
pub fn parse_timestamp(
    field: &str,
    value: Option<&Value>,
    failure: &mut ValidationFailure,
) -> Option<chrono::DateTime<chrono::Utc>> {
    match value {
        None => None,
        Some(Value::String(s)) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(ts) => Some(ts.with_timezone(&chrono::Utc)),
            Err(e) => {
                failure.push(field, format!("invalid timestamp: {}", e));
                None
            }
        },
        Some(other) => {
            failure.push(field, format!("expected timestamp string, got {}", type_name(other)));
            None
        }
    }
}

fn check_plain_map(
    field: &str,
    map: &serde_json::Map<String, Value>,
    failure: &mut ValidationFailure,
) {
    for (key, value) in map {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
            Value::Object(_) | Value::Array(_) => {
                // One level of structure is tolerated only when it is
                // itself JSON-serializable data, not class-like exotica;
                // arrays of scalars and plain nested objects pass.
                if !is_plain_value(value) {
                    failure.push(
                        format!("{}.{}", field, key),
                        "nested value is not plain data",
                    );
                }
            }
        }
    }
}

fn is_plain_value(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_plain_value),
        Value::Object(map) => map.values().all(is_plain_value),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EventCategory, ProviderCapabilities, SessionStatus, TokenUsage,
    };
    use serde_json::json;

    fn valid_session() -> NormalizedSession {
        let now = chrono::Utc::now();
        NormalizedSession {
            provider_id: "acp-claude".to_string(),
            session_id: "sess-1".to_string(),
            title: "title".to_string(),
            project: None,
            status: SessionStatus::Idle,
            created_at: now,
            updated_at: now,
            preview: None,
            capabilities: ProviderCapabilities::full(),
            metadata: None,
            raw: json!({}),
        }
    }

    fn valid_event() -> NormalizedEvent {
        NormalizedEvent {
            provider_id: "acp-claude".to_string(),
            session_id: "sess-1".to_string(),
            id: "sess-1#1".to_string(),
            category: EventCategory::AgentMessage,
            timestamp: chrono::Utc::now(),
            parent_id: None,
            text: None,
            payload: None,
            usage: None,
            raw: json!({"ok": true}),
        }
    }

    #[test]
    fn test_valid_inputs_pass() {
        assert!(validate_session(&valid_session()).is_ok());
        assert!(validate_event(&valid_event()).is_ok());
    }

    #[test]
    fn test_empty_ids_rejected_by_name() {
        let mut session = valid_session();
        session.session_id = "".to_string();
        session.provider_id = "  ".to_string();

        let failure = validate_session(&session).unwrap_err();
        assert!(failure.contains_field("sessionId"));
        assert!(failure.contains_field("providerId"));
        assert_eq!(failure.errors.len(), 2);
    }

    #[test]
    fn test_updated_before_created_rejected() {
        let mut session = valid_session();
        session.updated_at = session.created_at - chrono::Duration::seconds(5);

        let failure = validate_session(&session).unwrap_err();
        assert!(failure.contains_field("updatedAt"));
    }

    #[test]
    fn test_metadata_array_rejected() {
        assert!(validate_metadata_value(&json!({"k": "v"})).is_ok());

        let failure = validate_metadata_value(&json!(["a", "b"])).unwrap_err();
        assert!(failure.contains_field("metadata"));

        let failure = validate_metadata_value(&json!(null)).unwrap_err();
        assert!(failure.contains_field("metadata"));
    }

    #[test]
    fn test_invalid_timestamp_reported() {
        let mut failure = ValidationFailure::new();
        let parsed = parse_timestamp("createdAt", Some(&json!("yesterday")), &mut failure);
        assert!(parsed.is_none());
        assert!(failure.contains_field("createdAt"));

        let mut failure = ValidationFailure::new();
        let parsed = parse_timestamp(
            "createdAt",
            Some(&json!("2026-08-06T10:30:00Z")),
            &mut failure,
        );
        assert!(parsed.is_some());
        assert!(failure.is_empty());
    }

    #[test]
    fn test_self_parent_rejected() {
        let mut event = valid_event();
        event.parent_id = Some(event.id.clone());

        let failure = validate_event(&event).unwrap_err();
        assert!(failure.contains_field("parentId"));
    }

    #[test]
    fn test_corrupt_token_counts_rejected() {
        let mut event = valid_event();
        event.usage = Some(TokenUsage {
            prompt_tokens: TOKEN_CEILING + 1,
            completion_tokens: 10,
            total_tokens: TOKEN_CEILING + 11,
            cost: None,
            model: None,
        });

        let failure = validate_event(&event).unwrap_err();
        assert!(failure.contains_field("usage.promptTokens"));
        assert!(failure.contains_field("usage.totalTokens"));
        assert!(!failure.contains_field("usage.completionTokens"));
    }

    #[test]
    fn test_missing_raw_rejected() {
        let mut event = valid_event();
        event.raw = Value::Null;

        let failure = validate_event(&event).unwrap_err();
        assert!(failure.contains_field("raw"));
    }
}

//! Notification shape discrimination
//!
//! One explicit discriminator turns an arbitrary provider notification into
//! a tagged [`RawKind`] before any normalization happens; business logic
//! never probes raw JSON shapes directly.

use super::normalizer::{status_of, usage_of};
use crate::acp::AcpNotification;
use crate::types::{
    AcpApprovalPayload, ApprovalKind, ApprovalOption, EventCategory, SessionStatus, TokenUsage,
};
use serde_json::{Map, Value};

/// Classified notification, ready for buffering or immediate emission
#[derive(Debug)]
pub enum RawKind {
    /// Incremental piece of one logical event
    Delta {
        session_id: String,
        key: String,
        category: EventCategory,
        text: Option<String>,
        parent_id: Option<String>,
        payload: Map<String, Value>,
    },
    /// Terminal signal: flush the keyed buffer, or the whole session when
    /// no key is present
    Complete {
        session_id: String,
        key: Option<String>,
        usage: Option<TokenUsage>,
        payload: Map<String, Value>,
    },
    /// Session-level lifecycle change; flushes every open buffer
    Lifecycle {
        session_id: String,
        status: Option<SessionStatus>,
    },
    /// Permission prompt; bypasses buffering entirely
    Approval {
        session_id: String,
        payload: AcpApprovalPayload,
    },
    /// Free-form input request from the provider
    UserInput {
        session_id: String,
        prompt: Option<String>,
    },
    /// Unclassifiable; becomes a metadata event, raw preserved
    Unknown { session_id: Option<String> },
}

/// Discriminate an ACP notification
pub fn classify(notification: &AcpNotification) -> RawKind {
    let params = &notification.params;
    let session_id = params
        .get("sessionId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match notification.method.as_str() {
        "session/update" => {
            let Some(session_id) = session_id else {
                return RawKind::Unknown { session_id: None };
            };
            classify_update(session_id, params)
        }
        "session/status" | "session/lifecycle" => {
            let Some(session_id) = session_id else {
                return RawKind::Unknown { session_id: None };
            };
            RawKind::Lifecycle {
                session_id,
                status: status_of(params),
            }
        }
        "session/request_permission" => {
            let Some(session_id) = session_id else {
                return RawKind::Unknown { session_id: None };
            };
            RawKind::Approval {
                session_id,
                payload: approval_payload(notification),
            }
        }
        "session/request_input" => {
            let Some(session_id) = session_id else {
                return RawKind::Unknown { session_id: None };
            };
            RawKind::UserInput {
                session_id,
                prompt: params
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }
        }
        _ => RawKind::Unknown { session_id },
    }
}

fn classify_update(session_id: String, params: &Value) -> RawKind {
    let kind = params
        .get("sessionUpdate")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match kind {
        "user_message_chunk" => delta(session_id, params, EventCategory::UserMessage),
        "agent_message_chunk" => delta(session_id, params, EventCategory::AgentMessage),
        "agent_thought_chunk" | "thought" => delta(session_id, params, EventCategory::Reasoning),
        "plan" => delta_with_payload(
            session_id,
            params,
            EventCategory::Plan,
            &["entries"],
        ),
        "tool_call" => delta_with_payload(
            session_id,
            params,
            EventCategory::ToolCommand,
            &["toolCallId", "title", "kind", "status"],
        ),
        "tool_call_update" => {
            let status = params.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if matches!(status, "completed" | "failed" | "cancelled") {
                let payload = pick(params, &["status", "output"]);
                RawKind::Complete {
                    session_id,
                    key: correlation_key(params),
                    usage: usage_of(params),
                    payload,
                }
            } else {
                delta_with_payload(
                    session_id,
                    params,
                    EventCategory::ToolCommand,
                    &["toolCallId", "status", "output"],
                )
            }
        }
        "diff" | "file_diff" => delta_with_payload(
            session_id,
            params,
            EventCategory::FileDiff,
            &["path", "hunks", "toolCallId"],
        ),
        "turn_complete" | "message_complete" | "complete" => RawKind::Complete {
            session_id,
            key: correlation_key(params),
            usage: usage_of(params),
            payload: Map::new(),
        },
        _ => RawKind::Unknown {
            session_id: Some(session_id),
        },
    }
}

fn delta(session_id: String, params: &Value, category: EventCategory) -> RawKind {
    RawKind::Delta {
        key: correlation_key(params).unwrap_or_else(|| format!("cat:{:?}", category)),
        session_id,
        category,
        text: chunk_text(params),
        parent_id: params
            .get("parentId")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        payload: Map::new(),
    }
}

fn delta_with_payload(
    session_id: String,
    params: &Value,
    category: EventCategory,
    fields: &[&str],
) -> RawKind {
    match delta(session_id, params, category) {
        RawKind::Delta {
            session_id,
            key,
            category,
            text,
            parent_id,
            ..
        } => RawKind::Delta {
            session_id,
            key,
            category,
            text,
            parent_id,
            payload: pick(params, fields),
        },
        other => other,
    }
}

/// Correlation key: tool-call id, then message id, then turn id,
/// whichever the shape carries.
fn correlation_key(params: &Value) -> Option<String> {
    for field in ["toolCallId", "messageId", "turnId"] {
        if let Some(key) = params.get(field).and_then(|v| v.as_str()) {
            return Some(key.to_string());
        }
    }
    None
}

fn chunk_text(params: &Value) -> Option<String> {
    if let Some(text) = params
        .get("content")
        .and_then(|c| c.get("text"))
        .and_then(|v| v.as_str())
    {
        return Some(text.to_string());
    }
    params
        .get("text")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn pick(params: &Value, fields: &[&str]) -> Map<String, Value> {
    let mut payload = Map::new();
    for field in fields {
        if let Some(value) = params.get(*field) {
            if !value.is_null() {
                payload.insert((*field).to_string(), value.clone());
            }
        }
    }
    payload
}

fn approval_payload(notification: &AcpNotification) -> AcpApprovalPayload {
    let params = &notification.params;
    let options = params
        .get("options")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<ApprovalOption>(item.clone()).ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    // Providers that send a bare prompt still need answerable options.
    let options = if options.is_empty() {
        vec![
            ApprovalOption {
                option_id: "allow".to_string(),
                kind: ApprovalKind::AllowOnce,
                label: None,
            },
            ApprovalOption {
                option_id: "reject".to_string(),
                kind: ApprovalKind::RejectOnce,
                label: None,
            },
        ]
    } else {
        options
    };

    AcpApprovalPayload {
        rpc_id: notification.rpc_id.clone().unwrap_or(Value::Null),
        tool_call_id: params
            .get("toolCallId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        options,
    }
}

//! Streaming event normalizer
//!
//! Folds incremental provider notifications into immutable
//! [`NormalizedEvent`]s. Partial deltas are buffered per correlation key and
//! flushed on a terminal signal; flush order on the outbound channel is the
//! authoritative per-session ordering.

use super::classify::{classify, RawKind};
use crate::acp::AcpNotification;
use crate::types::{EventCategory, NormalizedEvent, SessionStatus, TokenUsage};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A partially accumulated event awaiting its terminal signal
struct EventBuffer {
    category: EventCategory,
    text: String,
    parent_id: Option<String>,
    payload: Map<String, Value>,
    raws: Vec<Value>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl EventBuffer {
    fn new(category: EventCategory) -> Self {
        Self {
            category,
            text: String::new(),
            parent_id: None,
            payload: Map::new(),
            raws: Vec::new(),
            started_at: chrono::Utc::now(),
        }
    }
}

/// Folds raw notifications from one provider into normalized events
pub struct StreamNormalizer {
    provider_id: String,
    events_tx: mpsc::UnboundedSender<NormalizedEvent>,
    /// Open buffers keyed by (session id, correlation key)
    buffers: HashMap<(String, String), EventBuffer>,
    /// Per-session sequence for generated event ids
    seq: HashMap<String, u64>,
}

impl StreamNormalizer {
    pub fn new(provider_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<NormalizedEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                provider_id: provider_id.into(),
                events_tx,
                buffers: HashMap::new(),
                seq: HashMap::new(),
            },
            events_rx,
        )
    }

    /// Consume one raw notification, buffering or emitting as its shape
    /// dictates.
    pub fn ingest(&mut self, notification: &AcpNotification) {
        let raw = raw_of(notification);

        match classify(notification) {
            RawKind::Delta {
                session_id,
                key,
                category,
                text,
                parent_id,
                payload,
            } => {
                let slot = (session_id.clone(), key);

                // A category change on the same key is a terminal signal
                // for whatever was buffered there.
                let category_changed = self
                    .buffers
                    .get(&slot)
                    .map(|b| b.category != category)
                    .unwrap_or(false);
                if category_changed {
                    self.flush(&slot, None);
                }

                let buffer = self
                    .buffers
                    .entry(slot)
                    .or_insert_with(|| EventBuffer::new(category));
                if let Some(text) = text {
                    buffer.text.push_str(&text);
                }
                if buffer.parent_id.is_none() {
                    buffer.parent_id = parent_id;
                }
                for (k, v) in payload {
                    buffer.payload.insert(k, v);
                }
                buffer.raws.push(raw);
            }

            RawKind::Complete {
                session_id,
                key,
                usage,
                payload,
            } => match key {
                Some(key) => {
                    let slot = (session_id.clone(), key);
                    match self.buffers.get_mut(&slot) {
                        Some(buffer) => {
                            for (k, v) in payload {
                                buffer.payload.insert(k, v);
                            }
                            buffer.raws.push(raw);
                        }
                        None => {
                            // Terminal signal with no open buffer; the raw
                            // payload still must not be lost.
                            warn!("Completion for unknown correlation key {:?}", slot.1);
                            self.emit(
                                &session_id,
                                EventCategory::Metadata,
                                None,
                                if payload.is_empty() { None } else { Some(payload) },
                                usage,
                                raw,
                            );
                            return;
                        }
                    }
                    self.flush(&slot, usage);
                }
                // A completion without a key ends the whole turn: every
                // open buffer for the session flushes in insertion order.
                None => self.flush_session(&session_id, usage),
            },

            RawKind::Lifecycle { session_id, status } => {
                self.flush_session(&session_id, None);

                let mut payload = Map::new();
                if let Some(status) = status {
                    payload.insert(
                        "status".to_string(),
                        serde_json::to_value(status).unwrap_or(Value::Null),
                    );
                }
                self.emit(
                    &session_id,
                    EventCategory::LifecycleStatus,
                    None,
                    Some(payload),
                    None,
                    raw,
                );
            }

            // Approvals must reach the UI before any buffering delay.
            RawKind::Approval {
                session_id,
                payload,
            } => {
                self.emit(
                    &session_id,
                    EventCategory::ApprovalRequest,
                    None,
                    Some(payload.into_map()),
                    None,
                    raw,
                );
            }

            RawKind::UserInput { session_id, prompt } => {
                self.emit(
                    &session_id,
                    EventCategory::UserInputRequest,
                    prompt,
                    None,
                    None,
                    raw,
                );
            }

            RawKind::Unknown { session_id } => {
                debug!("Unclassifiable notification mapped to metadata: {}", notification.method);
                let session_id = session_id.unwrap_or_else(|| "unknown".to_string());
                self.emit(&session_id, EventCategory::Metadata, None, None, None, raw);
            }
        }
    }

    /// Normalize a standalone payload into exactly one event, for adapters
    /// that do not stream deltas.
    pub fn normalize_one(&mut self, notification: &AcpNotification) -> NormalizedEvent {
        let raw = raw_of(notification);

        match classify(notification) {
            RawKind::Delta {
                session_id,
                category,
                text,
                parent_id,
                payload,
                ..
            } => self.build(
                &session_id,
                category,
                text,
                if payload.is_empty() { None } else { Some(payload) },
                None,
                raw,
                parent_id,
            ),
            RawKind::Approval {
                session_id,
                payload,
            } => self.build(
                &session_id,
                EventCategory::ApprovalRequest,
                None,
                Some(payload.into_map()),
                None,
                raw,
                None,
            ),
            RawKind::UserInput { session_id, prompt } => self.build(
                &session_id,
                EventCategory::UserInputRequest,
                prompt,
                None,
                None,
                raw,
                None,
            ),
            RawKind::Lifecycle { session_id, status } => {
                let mut payload = Map::new();
                if let Some(status) = status {
                    payload.insert(
                        "status".to_string(),
                        serde_json::to_value(status).unwrap_or(Value::Null),
                    );
                }
                self.build(
                    &session_id,
                    EventCategory::LifecycleStatus,
                    None,
                    Some(payload),
                    None,
                    raw,
                    None,
                )
            }
            RawKind::Complete {
                session_id,
                usage,
                payload,
                ..
            } => self.build(
                &session_id,
                EventCategory::Metadata,
                None,
                if payload.is_empty() { None } else { Some(payload) },
                usage,
                raw,
                None,
            ),
            RawKind::Unknown { session_id } => {
                let session_id = session_id.unwrap_or_else(|| "unknown".to_string());
                self.build(&session_id, EventCategory::Metadata, None, None, None, raw, None)
            }
        }
    }

    /// Open buffer count, used by adapter shutdown to drain cleanly
    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn flush(&mut self, slot: &(String, String), usage: Option<TokenUsage>) {
        let Some(buffer) = self.buffers.remove(slot) else {
            return;
        };

        let raw = match buffer.raws.len() {
            0 => Value::Null,
            1 => buffer.raws.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(buffer.raws),
        };

        let text = if buffer.text.is_empty() {
            None
        } else {
            Some(buffer.text)
        };
        let payload = if buffer.payload.is_empty() {
            None
        } else {
            Some(buffer.payload)
        };

        let mut event = self.build(
            &slot.0,
            buffer.category,
            text,
            payload,
            usage,
            raw,
            buffer.parent_id,
        );
        event.timestamp = buffer.started_at;
        self.send(event);
    }

    fn flush_session(&mut self, session_id: &str, usage: Option<TokenUsage>) {
        let mut slots: Vec<(String, String)> = self
            .buffers
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .cloned()
            .collect();
        // Oldest buffer first so flush order tracks arrival order.
        slots.sort_by_key(|slot| self.buffers[slot].started_at);

        let last = slots.len().saturating_sub(1);
        for (i, slot) in slots.into_iter().enumerate() {
            // Turn-level usage belongs to the final flushed event.
            let usage = if i == last { usage.clone() } else { None };
            self.flush(&slot, usage);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        session_id: &str,
        category: EventCategory,
        text: Option<String>,
        payload: Option<Map<String, Value>>,
        usage: Option<TokenUsage>,
        raw: Value,
        parent_id: Option<String>,
    ) -> NormalizedEvent {
        let seq = self.seq.entry(session_id.to_string()).or_insert(0);
        *seq += 1;

        NormalizedEvent {
            provider_id: self.provider_id.clone(),
            session_id: session_id.to_string(),
            id: format!("{}#{}", session_id, seq),
            category,
            timestamp: chrono::Utc::now(),
            parent_id,
            text,
            payload,
            usage,
            raw,
        }
    }

    fn emit(
        &mut self,
        session_id: &str,
        category: EventCategory,
        text: Option<String>,
        payload: Option<Map<String, Value>>,
        usage: Option<TokenUsage>,
        raw: Value,
    ) {
        let event = self.build(session_id, category, text, payload, usage, raw, None);
        self.send(event);
    }

    fn send(&self, event: NormalizedEvent) {
        if self.events_tx.send(event).is_err() {
            warn!("Event channel closed, dropping flushed event");
        }
    }
}

/// Reassemble the wire shape so the raw payload survives normalization
fn raw_of(notification: &AcpNotification) -> Value {
    let mut raw = serde_json::json!({
        "method": notification.method,
        "params": notification.params,
    });
    if let Some(rpc_id) = &notification.rpc_id {
        raw["id"] = rpc_id.clone();
    }
    raw
}

/// Convenience used by lifecycle classification
pub(super) fn status_of(params: &Value) -> Option<SessionStatus> {
    params
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(SessionStatus::parse)
}

/// Extract a token-usage record from completion params
pub(super) fn usage_of(params: &Value) -> Option<TokenUsage> {
    let usage = params.get("usage")?;
    let prompt = usage.get("promptTokens").and_then(|v| v.as_u64())?;
    let completion = usage.get("completionTokens").and_then(|v| v.as_u64())?;
    let mut record = TokenUsage::from_counts(prompt, completion);
    if let Some(total) = usage.get("totalTokens").and_then(|v| v.as_u64()) {
        record.total_tokens = total;
    }
    record.cost = usage.get("cost").and_then(|v| v.as_f64());
    record.model = usage
        .get("model")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Some(record)
}

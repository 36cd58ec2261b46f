use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::severity::Severity;

const NO_MESSAGE: &str = "(no event message given)";
const MINIMUM_MESSAGE: &str = "(message omitted, buffer too small)";
const MINIMUM_BUFFER_RATIO: f64 = 1.0;
const TRUNCATED_BUFFER_RATIO: f64 = 0.98;

/// An event already rendered by the platform event source, ready to be
/// turned into a JSON record.
#[derive(Clone, Debug)]
pub struct RenderedEvent {
    pub host: String,
    pub provider: String,
    pub severity: Severity,
    pub facility: u8,
    pub source_type: String,
    pub source_tag: String,
    pub log_type: String,
    pub event_id: u32,
    pub event_log: String,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event_data: Vec<(String, String)>,
}

/// Which fields of the record were actually emitted, reflecting how much
/// of the target buffer was available.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizingPolicy {
    /// Every field, including all event-data items.
    Full,
    /// Message shortened and prefixed with a truncation notice;
    /// event-data still included.
    Truncated,
    /// Message replaced by a placeholder; event-data omitted entirely.
    Minimum,
}

fn base_record(event: &RenderedEvent, message: &str) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("host".into(), json!(event.host));
    record.insert("program".into(), json!(event.provider));
    record.insert("severity".into(), json!(event.severity.code()));
    record.insert("facility".into(), json!(event.facility));
    record.insert("_source_type".into(), json!(event.source_type));
    record.insert("_source_tag".into(), json!(event.source_tag));
    record.insert("log_type".into(), json!(event.log_type));
    record.insert("event_id".into(), json!(event.event_id));
    record.insert("event_log".into(), json!(event.event_log));
    record.insert("message".into(), json!(message));
    record
}

fn message_text(event: &RenderedEvent) -> &str {
    event.message.as_deref().unwrap_or(NO_MESSAGE)
}

fn with_extra_fields(mut record: Map<String, Value>, event: &RenderedEvent, http_framing: bool) -> Map<String, Value> {
    if http_framing {
        let extra: Map<String, Value> =
            event.event_data.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        record.insert("extra_fields".into(), Value::Object(extra));
    }
    record
}

fn render_full(event: &RenderedEvent, http_framing: bool) -> Vec<u8> {
    let record = base_record(event, message_text(event));
    let record = with_extra_fields(record, event, http_framing);
    serde_json::to_vec(&Value::Object(record)).expect("record serializes")
}

fn render_truncated(event: &RenderedEvent, http_framing: bool, target_buffer: usize) -> Vec<u8> {
    let full_message = message_text(event);
    let mut message = full_message.to_string();
    loop {
        let notice = format!(
            "(message truncated: {} bytes requested, {} bytes available) ",
            full_message.len(),
            target_buffer
        );
        let candidate = format!("{notice}{message}");
        let record = base_record(event, &candidate);
        let record = with_extra_fields(record, event, http_framing);
        let bytes = serde_json::to_vec(&Value::Object(record)).expect("record serializes");
        if bytes.len() <= target_buffer || message.is_empty() {
            return bytes;
        }
        let shrink_to = message.len() - (message.len() / 4).max(1);
        message.truncate(shrink_to);
    }
}

fn render_minimum(event: &RenderedEvent) -> Vec<u8> {
    let record = base_record(event, MINIMUM_MESSAGE);
    serde_json::to_vec(&Value::Object(record)).expect("record serializes")
}

/// Builds the JSON bytes for `event`, downgrading from [`SizingPolicy::Full`]
/// toward [`SizingPolicy::Minimum`] until the result fits in `target_buffer`
/// bytes. Returns `None` if even the minimum record doesn't fit.
pub fn build_record(event: &RenderedEvent, target_buffer: usize, http_framing: bool) -> Option<(SizingPolicy, Vec<u8>)> {
    let full = render_full(event, http_framing);
    let full_ratio = full.len() as f64 / target_buffer.max(1) as f64;

    if full_ratio < TRUNCATED_BUFFER_RATIO {
        return Some((SizingPolicy::Full, full));
    }

    if full_ratio < MINIMUM_BUFFER_RATIO {
        let truncated = render_truncated(event, http_framing, target_buffer);
        if truncated.len() <= target_buffer {
            return Some((SizingPolicy::Truncated, truncated));
        }
    }

    let minimum = render_minimum(event);
    if minimum.len() <= target_buffer { Some((SizingPolicy::Minimum, minimum)) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(message_len: usize) -> RenderedEvent {
        RenderedEvent {
            host: "host01".into(),
            provider: "sshd".into(),
            severity: Severity::Error,
            facility: 1,
            source_type: "eventlog".into(),
            source_tag: "security".into(),
            log_type: "Security".into(),
            event_id: 4625,
            event_log: "Security".into(),
            message: Some("x".repeat(message_len)),
            timestamp: DateTime::<Utc>::MIN_UTC,
            event_data: vec![("user".into(), "alice".into())],
        }
    }

    #[test]
    fn full_policy_when_plenty_of_room() {
        let event = sample_event(20);
        let (policy, bytes) = build_record(&event, 4096, true).unwrap();
        assert_eq!(policy, SizingPolicy::Full);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event_id"], 4625);
        assert!(value.get("extra_fields").is_some());
    }

    #[test]
    fn truncated_policy_near_limit() {
        let event = sample_event(205);
        let (policy, bytes) = build_record(&event, 420, true).unwrap();
        assert_eq!(policy, SizingPolicy::Truncated);
        assert!(bytes.len() <= 420);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["message"].as_str().unwrap().starts_with("(message truncated:"));
    }

    #[test]
    fn minimum_policy_when_far_too_small() {
        let event = sample_event(2000);
        let (policy, bytes) = build_record(&event, 300, true).unwrap();
        assert_eq!(policy, SizingPolicy::Minimum);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("extra_fields").is_none());
        assert_eq!(value["message"], MINIMUM_MESSAGE);
    }

    #[test]
    fn control_characters_are_escaped() {
        let mut event = sample_event(1);
        event.message = Some("line1\nline2\x01".into());
        let (_, bytes) = build_record(&event, 4096, true).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\\u0001"));
        assert!(text.contains("\\n"));
    }

    #[test]
    fn absent_message_uses_placeholder() {
        let mut event = sample_event(1);
        event.message = None;
        let (_, bytes) = build_record(&event, 4096, true).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["message"], NO_MESSAGE);
    }
}

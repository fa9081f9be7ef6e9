//! Outbound SSE encoding.
//!
//! Every message becomes one `data: <json>` event. JSON from `serde_json` never
//! contains a raw newline, so each event is a single data line and the browser
//! can parse it without buffering across messages.

use axum::response::sse::Event;
use moodsprite_core::models::{Cue, Diagnostic};
use serde::Serialize;

/// Sent in place of any payload that fails to serialize.
pub const FALLBACK_PAYLOAD: &str = r#"{"error":"Encoding error","message":"Failed to encode event"}"#;

/// A message queued for the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Cue(Cue),
    Diagnostic(Diagnostic),
}

impl Outbound {
    pub fn is_cue(&self) -> bool {
        matches!(self, Outbound::Cue(_))
    }
}

/// Serialize a payload, degrading to [`FALLBACK_PAYLOAD`] on failure.
pub fn encode_payload<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode outbound event: {}", e);
            FALLBACK_PAYLOAD.to_string()
        }
    }
}

pub fn payload(message: &Outbound) -> String {
    match message {
        Outbound::Cue(cue) => encode_payload(cue),
        Outbound::Diagnostic(diag) => encode_payload(diag),
    }
}

pub fn to_event(message: &Outbound) -> Event {
    Event::default().data(payload(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    fn cue(uuid: &str) -> Cue {
        Cue {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            keyframe_uuid: uuid.to_string(),
            duration_valid_ms: None,
            explanation: None,
            alt_cue_text: None,
        }
    }

    #[test]
    fn test_cue_payload_has_no_null_fields() {
        let json = payload(&Outbound::Cue(cue("A")));
        assert_eq!(
            json,
            r#"{"timestamp":"2025-03-01T12:00:00.000Z","keyframeUuid":"A"}"#
        );
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_payload_is_single_line_even_with_newlines_in_text() {
        let mut c = cue("A");
        c.explanation = Some("line one\nline two".to_string());
        let json = payload(&Outbound::Cue(c));
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""explanation":"line one\nline two""#));
    }

    #[test]
    fn test_diagnostic_payload() {
        let json = payload(&Outbound::Diagnostic(Diagnostic::processing("cue has no keyframe uuid")));
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["error"], "Processing error");
        assert_eq!(v["message"], "cue has no keyframe uuid");
    }

    #[test]
    fn test_unserializable_payload_falls_back() {
        assert_eq!(encode_payload(&Unserializable), FALLBACK_PAYLOAD);
        let v: serde_json::Value = serde_json::from_str(FALLBACK_PAYLOAD).unwrap();
        assert_eq!(v["error"], "Encoding error");
    }
}

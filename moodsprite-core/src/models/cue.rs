//! Live sprite cues, as received from upstream and as sent to the browser.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// A cue as the upstream service emits it. Every field may be missing or
/// carry a proto3-style empty value, so nothing is trusted until it has been
/// converted into a [`Cue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveCue {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub duration_valid_ms: Option<u32>,
    #[serde(default)]
    pub keyframe_uuid: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub alt_cue_text: Option<String>,
}

/// Why a single upstream cue could not be forwarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CueError {
    #[error("cue has no keyframe uuid")]
    MissingKeyframeUuid,

    #[error("cue has no timestamp")]
    MissingTimestamp,

    #[error("invalid cue timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("undecodable cue: {0}")]
    Undecodable(String),
}

/// A validated sprite-display instruction in browser wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    #[serde(serialize_with = "serialize_iso8601")]
    pub timestamp: DateTime<Utc>,
    pub keyframe_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_valid_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_cue_text: Option<String>,
}

/// Millisecond precision with a `Z` suffix, the shape browsers produce from
/// `Date.prototype.toISOString`.
fn serialize_iso8601<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<LiveCue> for Cue {
    type Error = CueError;

    fn try_from(live: LiveCue) -> Result<Self, Self::Error> {
        let keyframe_uuid = non_empty(live.keyframe_uuid).ok_or(CueError::MissingKeyframeUuid)?;
        let raw_ts = non_empty(live.timestamp).ok_or(CueError::MissingTimestamp)?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map_err(|_| CueError::InvalidTimestamp(raw_ts.clone()))?
            .with_timezone(&Utc);

        Ok(Self {
            timestamp,
            keyframe_uuid,
            duration_valid_ms: live.duration_valid_ms.filter(|ms| *ms > 0),
            explanation: non_empty(live.explanation),
            alt_cue_text: non_empty(live.alt_cue_text),
        })
    }
}

/// In-band diagnostic sent on the outbound stream once streaming has begun.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub error: String,
    pub message: String,
}

impl Diagnostic {
    /// A single cue could not be processed; the stream continues.
    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            error: "Processing error".to_string(),
            message: message.into(),
        }
    }

    /// The upstream subscription failed; the stream closes after this.
    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            error: "Stream error".to_string(),
            message: message.into(),
        }
    }
}

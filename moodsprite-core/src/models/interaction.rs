use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request-level telemetry record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionLog {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: Option<u64>,
    pub keyframe_uuid: Option<String>,
    pub sprite_version: Option<String>,
    pub error_message: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
}

impl InteractionLog {
    pub fn new(
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            ..Default::default()
        }
    }
}

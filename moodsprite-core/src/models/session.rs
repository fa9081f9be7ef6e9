use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of one relay connection.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelaySession {
    pub id: Uuid,
    pub user_id: String,
    pub keyframes_served_count: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RelaySession {
    pub fn start(user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            keyframes_served_count: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

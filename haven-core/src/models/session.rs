use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One voice session. Updates address it by `(conversation_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: String,
    pub transcript: String,
    pub title: String,
    pub summary: String,
    pub duration_secs: i32,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: Uuid, conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            conversation_id: conversation_id.into(),
            transcript: String::new(),
            title: String::new(),
            summary: String::new(),
            duration_secs: 0,
            created_at: Utc::now(),
        }
    }
}

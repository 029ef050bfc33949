use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_MOOD_SCORE: i16 = 1;
pub const MAX_MOOD_SCORE: i16 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MoodEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub score: i16,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MoodEntry {
    pub fn is_valid_score(score: i16) -> bool {
        (MIN_MOOD_SCORE..=MAX_MOOD_SCORE).contains(&score)
    }
}

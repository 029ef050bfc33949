use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long-term profile. `goals` is newline-delimited, `themes` comma-delimited.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub bio: String,
    pub therapy_summary: String,
    pub goals: String,
    pub themes: String,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            bio: String::new(),
            therapy_summary: String::new(),
            goals: String::new(),
            themes: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn goal_list(&self) -> Vec<String> {
        self.goals
            .lines()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect()
    }

    pub fn theme_list(&self) -> Vec<String> {
        self.themes
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

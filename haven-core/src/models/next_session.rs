use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextSessionStatus {
    Ready,
    Consumed,
}

impl NextSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextSessionStatus::Ready => "ready",
            NextSessionStatus::Consumed => "consumed",
        }
    }
}

impl fmt::Display for NextSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NextSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(NextSessionStatus::Ready),
            "consumed" => Ok(NextSessionStatus::Consumed),
            other => Err(format!("unknown next-session status: {}", other)),
        }
    }
}

/// Per-user personalized opening script, one row per user, overwritten on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSession {
    pub user_id: Uuid,
    pub module_id: Option<Uuid>,
    pub greeting: String,
    pub instructions: String,
    pub agenda: String,
    pub status: NextSessionStatus,
    pub updated_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A "therapy module": read-only script template fed to personalization.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TherapyModule {
    pub id: Uuid,
    pub name: String,
    pub greeting: String,
    pub instructions: String,
    pub agenda: String,
}

impl TherapyModule {
    /// Starter script used when the store has no modules yet (in-memory runs).
    pub fn starter(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            greeting: "Welcome back. Before we start, how have things been since we last spoke?"
                .to_string(),
            instructions: "Open with a short check-in. Reflect what you hear before offering \
                anything new. Keep the pace gentle and ask one question at a time."
                .to_string(),
            agenda: "1. Check in on mood and the past week\n\
                2. Review progress on current goals\n\
                3. Explore one recurring theme\n\
                4. Agree on one small step before next time"
                .to_string(),
        }
    }
}

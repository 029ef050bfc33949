//! Merge a stored profile with one session's insights.
//!
//! The merge itself (goal ordering, theme dedup) is left to the model. Code
//! only builds the prompt, extracts the four fields, and serializes them back
//! to the stored delimiters.

use serde::{Deserialize, Serialize};

use super::{PipelineError, SessionInsights};
use crate::extract::{self, TextList};
use crate::llm::CompletionBackend;
use crate::models::UserProfile;
use crate::store::ProfileUpdate;

const SYSTEM_PROMPT: &str = "You maintain a long-term therapy profile for one client. \
You merge new session notes into the existing profile without losing important history.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedProfile {
    pub bio: String,
    pub therapy_summary: String,
    pub goals: Vec<String>,
    pub themes: Vec<String>,
}

impl SynthesizedProfile {
    /// Stored form: newline-delimited goals, comma-delimited themes.
    pub fn to_update(&self) -> ProfileUpdate {
        ProfileUpdate {
            bio: self.bio.clone(),
            therapy_summary: self.therapy_summary.clone(),
            goals: self.goals.join("\n"),
            themes: self.themes.join(", "),
        }
    }
}

#[derive(Deserialize)]
struct StructuredProfile {
    #[serde(default)]
    bio: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    goals: TextList,
    #[serde(default)]
    themes: TextList,
}

fn or_none(s: &str) -> &str {
    if s.trim().is_empty() {
        "(none)"
    } else {
        s
    }
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn synthesis_prompt(previous: &UserProfile, insights: &SessionInsights) -> String {
    format!(
        "Update the client's profile with the notes from their latest session.\n\n\
PREVIOUS PROFILE\n\
Previous bio: {bio}\n\
Previous summary: {summary}\n\
Previous goals:\n{goals}\n\
Previous themes: {themes}\n\n\
LATEST SESSION\n\
Session title: {title}\n\
Session summary: {session_summary}\n\
New goals:\n{new_goals}\n\
New themes: {new_themes}\n\
New bio details: {new_bio}\n\n\
Rules:\n\
- Put new goals first, then earlier goals that are still relevant, most important first.\n\
- Drop goals the client has achieved or abandoned.\n\
- Merge themes that mean the same thing; keep each theme once.\n\
- Keep the summary to one paragraph covering the whole course of therapy.\n\n\
Respond with exactly these sections:\n\
Bio: ...\n\
Summary: ...\n\
Goals:\n- one goal per line\n\
Themes: comma-separated themes",
        bio = or_none(&previous.bio),
        summary = or_none(&previous.therapy_summary),
        goals = bullets(&previous.goal_list()),
        themes = or_none(&previous.themes),
        title = or_none(&insights.title),
        session_summary = or_none(&insights.summary),
        new_goals = bullets(&insights.goals),
        new_themes = or_none(&insights.themes.join(", ")),
        new_bio = or_none(&insights.bio),
    )
}

pub fn parse_synthesis(reply: &str) -> SynthesizedProfile {
    if let Some(s) = extract::parse_structured::<StructuredProfile>(reply) {
        return SynthesizedProfile {
            bio: s.bio.trim().to_string(),
            therapy_summary: s.summary.trim().to_string(),
            goals: s.goals.into_lines(),
            themes: s.themes.into_csv(),
        };
    }

    SynthesizedProfile {
        bio: extract::extract_field(reply, "Bio"),
        therapy_summary: extract::extract_field(reply, "Summary"),
        goals: extract::extract_list(reply, "Goals"),
        themes: extract::extract_csv(reply, "Themes"),
    }
}

/// One completion call that folds `insights` into `previous`.
pub async fn synthesize_profile(
    backend: &dyn CompletionBackend,
    previous: &UserProfile,
    insights: &SessionInsights,
) -> Result<SynthesizedProfile, PipelineError> {
    let reply = backend
        .complete(SYSTEM_PROMPT, &synthesis_prompt(previous, insights))
        .await?;
    let merged = parse_synthesis(&reply);

    tracing::debug!(
        user_id = %previous.id,
        previous_goals = previous.goal_list().len(),
        merged_goals = merged.goals.len(),
        "Profile synthesized"
    );

    Ok(merged)
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PipelineError;
use crate::extract;
use crate::llm::CompletionBackend;
use crate::models::{NextSession, NextSessionStatus, TherapyModule, UserProfile};
use crate::store::Store;

const SYSTEM_PROMPT: &str = "You adapt scripted therapy-session openings to a specific client. \
You keep the structure, tone and length of the script you are given.";

/// How a personalization request names its template.
#[derive(Debug, Clone)]
pub enum ModuleRef {
    Id(Uuid),
    Name(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedScript {
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub agenda: String,
}

pub fn personalization_prompt(profile: &UserProfile, module: &TherapyModule) -> String {
    format!(
        "Personalize the session script below for this client.\n\n\
CLIENT\n\
Bio: {bio}\n\
Therapy so far: {summary}\n\
Current goals:\n{goals}\n\
Recurring themes: {themes}\n\n\
SCRIPT ({name})\n\
Greeting: {greeting}\n\
Instructions: {instructions}\n\
Agenda: {agenda}\n\n\
Rewrite each of the three parts so it speaks to this client's goals and themes. \
Keep the same structure and roughly the same length as the original part. \
Respond with exactly:\n\
Greeting: ...\n\
Instructions: ...\n\
Agenda: ...",
        bio = profile.bio,
        summary = profile.therapy_summary,
        goals = profile
            .goal_list()
            .iter()
            .map(|g| format!("- {}", g))
            .collect::<Vec<_>>()
            .join("\n"),
        themes = profile.themes,
        name = module.name,
        greeting = module.greeting,
        instructions = module.instructions,
        agenda = module.agenda,
    )
}

/// Structured reply first, then the three anchored sections. A miss is an empty field.
pub fn parse_script(reply: &str) -> PersonalizedScript {
    if let Some(script) = extract::parse_structured::<PersonalizedScript>(reply) {
        return script;
    }

    PersonalizedScript {
        greeting: extract::extract_between(reply, "Greeting", Some("Instructions")),
        instructions: extract::extract_between(reply, "Instructions", Some("Agenda")),
        agenda: extract::extract_between(reply, "Agenda", None),
    }
}

async fn resolve_module(
    store: &dyn Store,
    module: &ModuleRef,
) -> Result<TherapyModule, PipelineError> {
    let found = match module {
        ModuleRef::Id(id) => store.get_module(*id).await?,
        ModuleRef::Name(name) => store.find_module_by_name(name).await?,
    };
    found.ok_or(PipelineError::NotFound("therapy module"))
}

/// Adapt `module` to the user's profile and overwrite their next-session row.
///
/// Concurrent calls for the same user are not coordinated: the last upsert wins.
pub async fn personalize_next_session(
    store: &dyn Store,
    backend: &dyn CompletionBackend,
    user_id: Uuid,
    module: ModuleRef,
) -> Result<NextSession, PipelineError> {
    let profile = store
        .get_user(user_id)
        .await?
        .ok_or(PipelineError::NotFound("user"))?;
    let template = resolve_module(store, &module).await?;

    let reply = backend
        .complete(SYSTEM_PROMPT, &personalization_prompt(&profile, &template))
        .await?;
    let script = parse_script(&reply);

    let next = NextSession {
        user_id,
        module_id: Some(template.id),
        greeting: script.greeting,
        instructions: script.instructions,
        agenda: script.agenda,
        status: NextSessionStatus::Ready,
        updated_at: Utc::now(),
    };
    store.upsert_next_session(&next).await?;

    tracing::info!(
        user_id = %user_id,
        module = %template.name,
        empty_sections = [&next.greeting, &next.instructions, &next.agenda]
            .iter()
            .filter(|s| s.is_empty())
            .count(),
        "Next session personalized"
    );

    Ok(next)
}

//! Request dispatch.
//!
//! Every HTTP endpoint turns its validated input into a `HavenRequest` and
//! hands it here. Handlers return the JSON body on success; the HTTP layer
//! maps `PipelineError` to a status code once.

use chrono::Utc;
use haven_core::models::{MoodEntry, NextSessionStatus};
use haven_core::pipeline::{
    self, GoalCompletionCache, ModuleRef, PipelineError, TranscriptJob,
};
use haven_core::store::SessionUpdate;
use haven_core::webhook::PostCall;
use haven_core::{CompletionBackend, HavenConfig, Store};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum HavenRequest {
    ProcessTranscript(TranscriptJob),
    Personalize {
        user_id: Uuid,
        module_id: Option<Uuid>,
    },
    CheckGoals {
        user_id: Uuid,
        transcript: String,
        goals: Option<Vec<String>>,
    },
    PostCall(PostCall),
    RecordMood {
        user_id: Uuid,
        score: i16,
        note: Option<String>,
    },
    ListMood {
        user_id: Uuid,
        limit: i64,
    },
    ListSessions {
        user_id: Uuid,
    },
    NextSession {
        user_id: Uuid,
        consume: bool,
    },
}

pub async fn handle_request(
    request: HavenRequest,
    store: &dyn Store,
    backend: &dyn CompletionBackend,
    config: &HavenConfig,
) -> Result<serde_json::Value, PipelineError> {
    match request {
        HavenRequest::ProcessTranscript(job) => {
            let outcome = pipeline::process_transcript(store, backend, job).await?;
            Ok(json!({
                "sessionId": outcome.session.id,
                "title": outcome.insights.title,
                "summary": outcome.insights.summary,
                "goals": outcome.insights.goals,
                "themes": outcome.insights.themes,
                "bio": outcome.insights.bio,
                "profile": outcome.profile,
            }))
        }
        HavenRequest::Personalize { user_id, module_id } => {
            let module = match module_id {
                Some(id) => ModuleRef::Id(id),
                None => ModuleRef::Name(config.personalization.default_module.clone()),
            };
            let next = pipeline::personalize_next_session(store, backend, user_id, module).await?;
            Ok(serde_json::to_value(next).unwrap_or_default())
        }
        HavenRequest::CheckGoals {
            user_id,
            transcript,
            goals,
        } => {
            let user = store
                .get_user(user_id)
                .await?
                .ok_or(PipelineError::NotFound("user"))?;
            let goals = goals.unwrap_or_else(|| user.goal_list());
            let mut cache = GoalCompletionCache::new();
            let check =
                pipeline::check_goal_completion(backend, &transcript, &goals, &mut cache).await?;
            Ok(serde_json::to_value(check).unwrap_or_default())
        }
        HavenRequest::PostCall(call) => handle_post_call(call, store, backend).await,
        HavenRequest::RecordMood {
            user_id,
            score,
            note,
        } => {
            if !MoodEntry::is_valid_score(score) {
                return Err(PipelineError::Invalid(format!(
                    "score must be between 1 and 10, got {}",
                    score
                )));
            }
            store
                .get_user(user_id)
                .await?
                .ok_or(PipelineError::NotFound("user"))?;
            let entry = MoodEntry {
                id: Uuid::new_v4(),
                user_id,
                score,
                note: note.filter(|n| !n.trim().is_empty()),
                created_at: Utc::now(),
            };
            store.insert_mood(&entry).await?;
            Ok(serde_json::to_value(entry).unwrap_or_default())
        }
        HavenRequest::ListMood { user_id, limit } => {
            let entries = store.list_mood(user_id, limit).await?;
            Ok(json!({ "entries": entries, "count": entries.len() }))
        }
        HavenRequest::ListSessions { user_id } => {
            let sessions = store.list_sessions(user_id).await?;
            Ok(json!({ "sessions": sessions, "count": sessions.len() }))
        }
        HavenRequest::NextSession { user_id, consume } => {
            let mut next = store
                .get_next_session(user_id)
                .await?
                .ok_or(PipelineError::NotFound("next session"))?;
            if consume && next.status == NextSessionStatus::Ready {
                store
                    .set_next_session_status(user_id, NextSessionStatus::Consumed)
                    .await?;
                tracing::info!(user_id = %user_id, "Next session consumed");
                next.status = NextSessionStatus::Consumed;
            }
            Ok(serde_json::to_value(next).unwrap_or_default())
        }
    }
}

/// Resolve the caller, record the raw session, then run the transcript pipeline.
async fn handle_post_call(
    call: PostCall,
    store: &dyn Store,
    backend: &dyn CompletionBackend,
) -> Result<serde_json::Value, PipelineError> {
    let user = store
        .find_user_by_email(&call.user_email)
        .await?
        .ok_or(PipelineError::NotFound("user"))?;

    // Redeliveries land on the same (conversation_id, user_id) row.
    store
        .upsert_session(
            user.id,
            &call.conversation_id,
            &SessionUpdate {
                transcript: call.transcript.clone(),
                title: String::new(),
                summary: String::new(),
                duration_secs: call.duration_secs,
            },
        )
        .await?;

    tracing::info!(
        user_id = %user.id,
        conversation_id = %call.conversation_id,
        duration_secs = call.duration_secs,
        "Post-call session recorded"
    );

    let outcome = pipeline::process_transcript(
        store,
        backend,
        TranscriptJob {
            user_id: user.id,
            conversation_id: call.conversation_id,
            transcript: call.transcript,
            duration_secs: call.duration_secs,
        },
    )
    .await?;

    Ok(json!({
        "received": true,
        "sessionId": outcome.session.id,
        "title": outcome.insights.title,
    }))
}

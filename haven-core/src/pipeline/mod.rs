//! Transcript → insights → profile, and profile → next-session script.
//!
//! Every stage is one sequential pass: one completion call, one extraction,
//! one write. Nothing is retried here and nothing is queued; the first error
//! ends the run and is handed to the caller unchanged.

pub mod goals;
pub mod insights;
pub mod personalize;
pub mod synthesis;

use thiserror::Error;
use uuid::Uuid;

use crate::llm::{CompletionBackend, CompletionError};
use crate::models::SessionRecord;
use crate::store::{SessionUpdate, Store, StoreError};

pub use goals::{check_goal_completion, GoalCheck, GoalCompletionCache};
pub use insights::{generate_insights, SessionInsights};
pub use personalize::{personalize_next_session, ModuleRef, PersonalizedScript};
pub use synthesis::{synthesize_profile, SynthesizedProfile};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

/// A validated process-transcript request.
#[derive(Debug, Clone)]
pub struct TranscriptJob {
    pub user_id: Uuid,
    pub conversation_id: String,
    pub transcript: String,
    pub duration_secs: i32,
}

#[derive(Debug, Clone)]
pub struct TranscriptOutcome {
    pub session: SessionRecord,
    pub insights: SessionInsights,
    pub profile: SynthesizedProfile,
}

/// Run insight extraction and profile synthesis for one finished session, then
/// persist the session row and overwrite the user's profile.
pub async fn process_transcript(
    store: &dyn Store,
    backend: &dyn CompletionBackend,
    job: TranscriptJob,
) -> Result<TranscriptOutcome, PipelineError> {
    if job.transcript.trim().is_empty() {
        return Err(PipelineError::MissingField("transcript"));
    }

    let user = store
        .get_user(job.user_id)
        .await?
        .ok_or(PipelineError::NotFound("user"))?;

    let insights = generate_insights(backend, &job.transcript).await?;
    let profile = synthesize_profile(backend, &user, &insights).await?;

    let session = store
        .upsert_session(
            job.user_id,
            &job.conversation_id,
            &SessionUpdate {
                transcript: job.transcript,
                title: insights.title.clone(),
                summary: insights.summary.clone(),
                duration_secs: job.duration_secs,
            },
        )
        .await?;

    store.update_profile(job.user_id, &profile.to_update()).await?;

    tracing::info!(
        user_id = %job.user_id,
        conversation_id = %job.conversation_id,
        goals = profile.goals.len(),
        themes = profile.themes.len(),
        "Transcript processed"
    );

    Ok(TranscriptOutcome {
        session,
        insights,
        profile,
    })
}

use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::extract::{self, TextList};
use crate::llm::CompletionBackend;

const SYSTEM_PROMPT: &str = "You are a clinical assistant that reviews therapy session transcripts \
and writes concise, factual session notes. Never invent details that are not in the transcript.";

/// Fields pulled out of one session transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInsights {
    pub title: String,
    pub summary: String,
    pub goals: Vec<String>,
    pub themes: Vec<String>,
    pub bio: String,
}

#[derive(Deserialize)]
struct StructuredInsights {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    goals: TextList,
    #[serde(default)]
    themes: TextList,
    #[serde(default)]
    bio: String,
}

pub fn insight_prompt(transcript: &str) -> String {
    format!(
        "Read the therapy session transcript below and respond with exactly these five sections, \
each starting on its own line with the label shown:\n\n\
Title: a short title for the session (under 8 words)\n\
Summary: two to four sentences on what was discussed and any progress\n\
Goals:\n- one goal per line that the client stated or agreed to\n\
Themes: comma-separated recurring themes\n\
Bio: one or two sentences of background the client shared about themselves\n\n\
Transcript:\n{}",
        transcript
    )
}

/// Structured reply first, labeled sections otherwise. Absent fields are empty.
pub fn parse_insights(reply: &str) -> SessionInsights {
    if let Some(s) = extract::parse_structured::<StructuredInsights>(reply) {
        return SessionInsights {
            title: s.title.trim().to_string(),
            summary: s.summary.trim().to_string(),
            goals: s.goals.into_lines(),
            themes: s.themes.into_csv(),
            bio: s.bio.trim().to_string(),
        };
    }

    SessionInsights {
        title: extract::extract_field(reply, "Title"),
        summary: extract::extract_field(reply, "Summary"),
        goals: extract::extract_list(reply, "Goals"),
        themes: extract::extract_csv(reply, "Themes"),
        bio: extract::extract_field(reply, "Bio"),
    }
}

/// One completion call over the full transcript.
pub async fn generate_insights(
    backend: &dyn CompletionBackend,
    transcript: &str,
) -> Result<SessionInsights, PipelineError> {
    if transcript.trim().is_empty() {
        return Err(PipelineError::MissingField("transcript"));
    }

    let reply = backend
        .complete(SYSTEM_PROMPT, &insight_prompt(transcript))
        .await?;
    let insights = parse_insights(&reply);

    if insights.title.is_empty() && insights.summary.is_empty() {
        tracing::warn!(backend = backend.name(), "Insight reply had no Title or Summary section");
    }

    Ok(insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedBackend;

    const FIXTURE: &str = "Title: Reconnecting with friends\n\
Summary: The client talked about isolation after moving cities.\n\
They planned to attend a climbing meetup.\n\
Goals:\n- Attend the Thursday climbing meetup\n- Text one old friend\n\
Themes: loneliness, relocation, social anxiety\n\
Bio: Recently moved to Denver for a new job.";

    #[tokio::test]
    async fn test_fixture_fields_returned_verbatim() {
        let backend = ScriptedBackend::new(&[FIXTURE]);
        let insights = generate_insights(&backend, "user: I moved here alone.").await.unwrap();

        assert_eq!(insights.title, "Reconnecting with friends");
        assert_eq!(
            insights.summary,
            "The client talked about isolation after moving cities.\nThey planned to attend a climbing meetup."
        );
        assert_eq!(
            insights.goals,
            vec!["Attend the Thursday climbing meetup", "Text one old friend"]
        );
        assert_eq!(insights.themes, vec!["loneliness", "relocation", "social anxiety"]);
        assert_eq!(insights.bio, "Recently moved to Denver for a new job.");
    }

    #[tokio::test]
    async fn test_prompt_carries_transcript_and_labels() {
        let backend = ScriptedBackend::new(&[FIXTURE]);
        generate_insights(&backend, "user: the transcript body").await.unwrap();
        let prompt = backend.prompt(0);
        assert!(prompt.contains("user: the transcript body"));
        for label in ["Title:", "Summary:", "Goals:", "Themes:", "Bio:"] {
            assert!(prompt.contains(label), "prompt missing {}", label);
        }
    }

    #[tokio::test]
    async fn test_malformed_reply_yields_empty_fields() {
        let backend = ScriptedBackend::new(&["I'm sorry, I can't help with that."]);
        let insights = generate_insights(&backend, "user: hi").await.unwrap();
        assert_eq!(insights, SessionInsights::default());
    }

    #[tokio::test]
    async fn test_api_error_propagates() {
        let backend = ScriptedBackend::failing(500);
        let err = generate_insights(&backend, "user: hi").await.unwrap_err();
        assert!(matches!(err, PipelineError::Completion(_)));
    }

    #[test]
    fn test_structured_reply_accepted() {
        let reply = r#"{"title": "T", "summary": "S", "goals": ["g1", "g2"], "themes": "a, b", "bio": "B"}"#;
        let insights = parse_insights(reply);
        assert_eq!(insights.title, "T");
        assert_eq!(insights.goals, vec!["g1", "g2"]);
        assert_eq!(insights.themes, vec!["a", "b"]);
    }
}

//! Goal completion check.
//!
//! The cache is owned by the caller and lives for one request or one session.
//! Nothing here is process-global, so concurrent requests never see each
//! other's answers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::PipelineError;
use crate::extract::{self, TextList};
use crate::llm::CompletionBackend;

const SYSTEM_PROMPT: &str = "You judge whether a therapy client achieved specific goals, \
using only evidence stated in the transcript.";

/// Answers already obtained for this request, keyed by normalized goal text.
#[derive(Debug, Default, Clone)]
pub struct GoalCompletionCache {
    answers: HashMap<String, bool>,
}

impl GoalCompletionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(goal: &str) -> String {
        goal.trim().to_lowercase()
    }

    pub fn get(&self, goal: &str) -> Option<bool> {
        self.answers.get(&Self::key(goal)).copied()
    }

    pub fn record(&mut self, goal: &str, completed: bool) {
        self.answers.insert(Self::key(goal), completed);
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCheck {
    pub completed: Vec<String>,
    pub pending: Vec<String>,
}

#[derive(Deserialize)]
struct StructuredCheck {
    #[serde(default)]
    completed: TextList,
}

pub fn goal_check_prompt(transcript: &str, goals: &[String]) -> String {
    let numbered = goals
        .iter()
        .enumerate()
        .map(|(i, g)| format!("{}. {}", i + 1, g))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Goals:\n{}\n\n\
Transcript:\n{}\n\n\
List only the goals the client clearly reports having achieved, copying each goal's \
text exactly, one per line. If none were achieved, leave the list empty.\n\
Completed:\n- ...",
        numbered, transcript
    )
}

/// Parse the reply into indexes of `asked`. Entries may be the goal text or its number.
fn completed_indexes(reply: &str, asked: &[String]) -> Vec<usize> {
    let lines = match extract::parse_structured::<StructuredCheck>(reply) {
        Some(s) => s.completed.into_lines(),
        None => extract::extract_list(reply, "Completed"),
    };

    let mut hits = Vec::new();
    for line in lines {
        let by_text = asked
            .iter()
            .position(|g| g.trim().eq_ignore_ascii_case(line.trim()));
        let by_number = line
            .split(|c: char| c == '.' || c == ')')
            .next()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .filter(|n| *n >= 1 && *n <= asked.len())
            .map(|n| n - 1);
        let by_numbered_text = by_number.filter(|i| {
            let rest = line.splitn(2, &['.', ')'][..]).nth(1).unwrap_or("").trim();
            rest.is_empty() || asked[*i].trim().eq_ignore_ascii_case(rest)
        });
        if let Some(i) = by_text.or(by_numbered_text) {
            if !hits.contains(&i) {
                hits.push(i);
            }
        }
    }
    hits
}

/// Ask which `goals` the transcript shows as achieved.
///
/// Goals already answered in `cache` are not sent again; when every goal is
/// cached no completion call is made. Goals the model does not list are
/// recorded as pending.
pub async fn check_goal_completion(
    backend: &dyn CompletionBackend,
    transcript: &str,
    goals: &[String],
    cache: &mut GoalCompletionCache,
) -> Result<GoalCheck, PipelineError> {
    let mut unanswered: Vec<String> = Vec::new();
    for goal in goals {
        if cache.get(goal).is_none()
            && !unanswered.iter().any(|g| g.eq_ignore_ascii_case(goal.trim()))
        {
            unanswered.push(goal.trim().to_string());
        }
    }

    if !unanswered.is_empty() {
        if transcript.trim().is_empty() {
            return Err(PipelineError::MissingField("transcript"));
        }
        let reply = backend
            .complete(SYSTEM_PROMPT, &goal_check_prompt(transcript, &unanswered))
            .await?;
        let hits = completed_indexes(&reply, &unanswered);
        for (i, goal) in unanswered.iter().enumerate() {
            cache.record(goal, hits.contains(&i));
        }
        tracing::debug!(asked = unanswered.len(), completed = hits.len(), "Goal check answered");
    }

    let mut check = GoalCheck::default();
    for goal in goals {
        match cache.get(goal) {
            Some(true) => check.completed.push(goal.clone()),
            _ => check.pending.push(goal.clone()),
        }
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedBackend;

    fn goals(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_completed_goals_split_from_pending() {
        let backend = ScriptedBackend::new(&["Completed:\n- Text one old friend"]);
        let mut cache = GoalCompletionCache::new();
        let check = check_goal_completion(
            &backend,
            "user: I finally texted Jess!",
            &goals(&["Attend the climbing meetup", "Text one old friend"]),
            &mut cache,
        )
        .await
        .unwrap();

        assert_eq!(check.completed, vec!["Text one old friend"]);
        assert_eq!(check.pending, vec!["Attend the climbing meetup"]);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_cached_goals_are_not_asked_again() {
        let backend = ScriptedBackend::new(&["Completed:\n- B", "Completed:\n- C"]);
        let mut cache = GoalCompletionCache::new();

        check_goal_completion(&backend, "t", &goals(&["A", "B"]), &mut cache)
            .await
            .unwrap();
        let check = check_goal_completion(&backend, "t", &goals(&["A", "B", "C"]), &mut cache)
            .await
            .unwrap();

        assert_eq!(backend.calls(), 2);
        let second = backend.prompt(1);
        assert!(second.contains("1. C"));
        assert!(!second.contains(". A"), "cached goal re-sent: {}", second);
        assert!(!second.contains(". B"), "cached goal re-sent: {}", second);
        assert_eq!(check.completed, vec!["B", "C"]);
        assert_eq!(check.pending, vec!["A"]);
    }

    #[tokio::test]
    async fn test_fully_cached_request_makes_no_call() {
        let backend = ScriptedBackend::new(&[]);
        let mut cache = GoalCompletionCache::new();
        cache.record("Walk daily", true);
        let check = check_goal_completion(&backend, "", &goals(&["walk daily"]), &mut cache)
            .await
            .unwrap();
        assert_eq!(backend.calls(), 0);
        assert_eq!(check.completed, vec!["walk daily"]);
    }

    #[tokio::test]
    async fn test_separate_caches_do_not_share_answers() {
        let backend = ScriptedBackend::new(&["Completed:\n- A", "Completed:\n"]);
        let mut first = GoalCompletionCache::new();
        let mut second = GoalCompletionCache::new();

        let a = check_goal_completion(&backend, "t", &goals(&["A"]), &mut first)
            .await
            .unwrap();
        let b = check_goal_completion(&backend, "t", &goals(&["A"]), &mut second)
            .await
            .unwrap();

        assert_eq!(a.completed, vec!["A"]);
        assert!(b.completed.is_empty());
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn test_numbered_and_structured_replies() {
        let asked = goals(&["Sleep early", "Call mom"]);
        assert_eq!(completed_indexes("Completed:\n- 2. Call mom", &asked), vec![1]);
        assert_eq!(completed_indexes("Completed:\n- 1", &asked), vec![0]);
        assert_eq!(
            completed_indexes(r#"{"completed": ["sleep early"]}"#, &asked),
            vec![0]
        );
        assert!(completed_indexes("Completed:\n- Something else", &asked).is_empty());
    }
}

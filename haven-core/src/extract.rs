//! Labeled-section extraction for model replies.
//!
//! The completion prompts ask for plain text laid out as
//!
//! ```text
//! Title: Finding calm at work
//! Summary: ...
//! Goals:
//! - Take a walk at lunch
//! - Journal before bed
//! ```
//!
//! A field runs from `Label:` to the next line that starts with `word:` or to
//! the end of the reply. Missing labels yield empty strings; nothing here ever
//! fails. When the model returns a JSON object instead, [`parse_structured`]
//! picks it up and the label scraping is skipped.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;

fn next_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\w+:").expect("static regex"))
}

/// Trimmed text following `"<label>:"` up to the next `word:` line or end of text.
///
/// Only the first occurrence of the label is considered.
pub fn extract_field(text: &str, label: &str) -> String {
    let marker = format!("{}:", label);
    let Some(pos) = text.find(&marker) else {
        return String::new();
    };
    let rest = &text[pos + marker.len()..];
    let end = next_label_re()
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

/// The field split into lines, bullet markers stripped, blank lines dropped.
pub fn extract_list(text: &str, label: &str) -> Vec<String> {
    split_list(&extract_field(text, label))
}

pub fn split_list(block: &str) -> Vec<String> {
    block
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(&['-', '*', '•'][..])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Comma-separated field (themes), each entry trimmed, empties dropped.
///
/// Bulleted replies are accepted too: every line is split on commas.
pub fn extract_csv(text: &str, label: &str) -> Vec<String> {
    split_list(&extract_field(text, label))
        .iter()
        .flat_map(|line| line.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Text anchored between `"<start>:"` and `"<end>:"`, or to the end of text when
/// `end` is `None`. Returns an empty string if either anchor is missing.
pub fn extract_between(text: &str, start: &str, end: Option<&str>) -> String {
    let pattern = match end {
        Some(end) => format!(
            r"{}:\s*([\s\S]*?)\s*{}:",
            regex::escape(start),
            regex::escape(end)
        ),
        None => format!(r"{}:\s*([\s\S]*)", regex::escape(start)),
    };
    let Ok(re) = Regex::new(&pattern) else {
        return String::new();
    };
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Deserialize a JSON object reply, tolerating a surrounding ```json fence.
///
/// Returns `None` for anything that is not a JSON object of the expected shape,
/// which sends the caller down the labeled-text path.
pub fn parse_structured<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let trimmed = reply.trim();
    let body = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        trimmed
    };
    if !body.starts_with('{') {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// A list field as a model may emit it in JSON: an array, or one delimited string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextList {
    Many(Vec<String>),
    One(String),
}

impl Default for TextList {
    fn default() -> Self {
        TextList::Many(Vec::new())
    }
}

impl TextList {
    /// Lines for goal-style lists.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            TextList::Many(items) => items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            TextList::One(block) => split_list(&block),
        }
    }

    /// Comma-split entries for theme-style lists.
    pub fn into_csv(self) -> Vec<String> {
        self.into_lines()
            .iter()
            .flat_map(|l| l.split(','))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

//! Mention extraction from markdown note content.

use crate::model::note::NoteId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[note:([^\]\s]+)\]\]").expect("valid mention regex"));

/// Returns every `[[note:<id>]]` target in `content`.
///
/// Targets are deduplicated and keep first-occurrence order. Self
/// references are not filtered out here; rejecting them is the
/// validator's job.
pub fn extract_mentions(content: &str) -> Vec<NoteId> {
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();
    for caps in MENTION_RE.captures_iter(content) {
        let Some(raw) = caps.get(1) else {
            continue;
        };
        let Ok(id) = NoteId::parse(raw.as_str()) else {
            continue;
        };
        if seen.insert(id.clone()) {
            mentions.push(id);
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::extract_mentions;

    fn ids(content: &str) -> Vec<String> {
        extract_mentions(content)
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    #[test]
    fn extracts_in_first_occurrence_order_without_duplicates() {
        let content = "see [[note:b]] and [[note:a]], again [[note:b]]";
        assert_eq!(ids(content), vec!["b", "a"]);
    }

    #[test]
    fn ignores_plain_links_and_malformed_markers() {
        let content = "[link](https://example.com) [[note:]] [[note: x]] [[other:y]] [[note:ok]]";
        assert_eq!(ids(content), vec!["ok"]);
    }

    #[test]
    fn empty_content_has_no_mentions() {
        assert!(extract_mentions("").is_empty());
    }
}

//! Character-level differences between two extracted texts, and the
//! bounded similarity score derived from them.
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use thiserror::Error;
use tokio::task::JoinError;

/// Past this deadline the diff falls back to a valid but non-minimal edit list.
const DIFF_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
#[error("diff task did not complete: {0}")]
pub struct DiffError(#[from] JoinError);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Equal,
    Delete,
    Insert,
}

/// A run of consecutive characters sharing the same edit kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub kind: EditKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPayload {
    pub edits: Vec<Edit>,
}

impl DiffPayload {
    /// Number of inserted plus deleted characters.
    pub fn size(&self) -> usize {
        self.edits
            .iter()
            .filter(|edit| edit.kind != EditKind::Equal)
            .map(|edit| edit.text.chars().count())
            .sum()
    }

    pub fn is_identical(&self) -> bool {
        self.size() == 0
    }

    /// Share of `original` touched by these edits, capped at 100.
    pub fn percentage_of(&self, original: &str) -> f64 {
        let original_len = original.chars().count();
        let altered_chars = self.size();
        if original_len == 0 {
            return if altered_chars == 0 { 0.0 } else { 100.0 };
        }

        (100.0 * altered_chars as f64 / original_len as f64).min(100.0)
    }

    /// Inline rendering: deletions as `[-...-]`, insertions as `{+...+}`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for edit in &self.edits {
            let (open, close) = match edit.kind {
                EditKind::Equal => ("", ""),
                EditKind::Delete => ("[-", "-]"),
                EditKind::Insert => ("{+", "+}"),
            };
            out.push_str(open);
            out.push_str(&edit.text);
            out.push_str(close);
        }
        out
    }
}

pub fn diff(original: &str, altered: &str) -> DiffPayload {
    let text_diff = TextDiff::configure()
        .timeout(DIFF_DEADLINE)
        .diff_chars(original, altered);

    let mut edits: Vec<Edit> = Vec::new();
    for change in text_diff.iter_all_changes() {
        let kind = match change.tag() {
            ChangeTag::Equal => EditKind::Equal,
            ChangeTag::Delete => EditKind::Delete,
            ChangeTag::Insert => EditKind::Insert,
        };
        match edits.last_mut() {
            Some(last) if last.kind == kind => last.text.push_str(change.value()),
            _ => edits.push(Edit {
                kind,
                text: change.value().to_owned(),
            }),
        }
    }

    DiffPayload { edits }
}

/// Percentage of `original` altered in `altered`, capped at 100.
///
/// An empty original scores 0 against an empty text and 100 against anything else.
pub fn score(original: &str, altered: &str) -> f64 {
    diff(original, altered).percentage_of(original)
}

/// Diff and score `altered` against `original` on the blocking thread pool.
///
/// A diff may run until `DIFF_DEADLINE`, which must not hold up an async worker thread.
pub async fn compare(original: String, altered: String) -> Result<(DiffPayload, f64), DiffError> {
    let compared = tokio::task::spawn_blocking(move || {
        let payload = diff(&original, &altered);
        let percentage = payload.percentage_of(&original);
        (payload, percentage)
    })
    .await?;

    Ok(compared)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "left_file")]
    pub left: String,
    #[serde(rename = "right_file")]
    pub right: String,
    #[serde(rename = "difference_percentage")]
    pub result: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_zero() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(score(text, text), 0.0);
        assert!(diff(text, text).is_identical());
    }

    #[test]
    fn single_deletion() {
        let payload = diff("hello world", "hello word");

        assert_eq!(payload.size(), 1);
        assert_eq!(payload.render(), "hello wor[-l-]d");

        let percentage = score("hello world", "hello word");
        assert!((percentage - 100.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn insertions_and_deletions_are_counted() {
        let payload = diff("cat", "cart!");

        assert_eq!(payload.size(), 2);
        assert_eq!(payload.render(), "ca{+r+}t{+!+}");
    }

    #[test]
    fn score_is_capped_at_one_hundred() {
        let percentage = score("ab", "a completely different and much longer text");
        assert_eq!(percentage, 100.0);
    }

    #[test]
    fn score_stays_in_bounds() {
        let pairs = [
            ("abc", "xyz"),
            ("abc", ""),
            ("lorem ipsum", "lorem ipsum dolor"),
            ("zażółć gęślą jaźń", "zazolc gesla jazn"),
        ];
        for (original, altered) in pairs {
            let percentage = score(original, altered);
            assert!(
                (0.0..=100.0).contains(&percentage),
                "{original:?} vs {altered:?} scored {percentage}"
            );
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        // One replaced character: one deletion plus one insertion over four characters.
        assert_eq!(score("żółw", "żólw"), 50.0);
    }

    #[test]
    fn empty_original_is_defined() {
        assert_eq!(score("", ""), 0.0);
        assert_eq!(score("", "something"), 100.0);
    }

    #[tokio::test]
    async fn compare_matches_inline_score() {
        let (payload, percentage) = compare("hello world".to_owned(), "hello word".to_owned())
            .await
            .unwrap();

        assert_eq!(payload, diff("hello world", "hello word"));
        assert_eq!(percentage, score("hello world", "hello word"));
    }

    #[tokio::test]
    async fn compare_leaves_runtime_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let ticks = Arc::new(AtomicUsize::new(0));
        let heartbeat = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });

        // Single-threaded runtime: the heartbeat only ticks if the diff yields it.
        let (_, percentage) = compare("ab".repeat(2000), "xy".repeat(2000))
            .await
            .unwrap();
        heartbeat.abort();

        assert_eq!(percentage, 100.0);
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn comparison_result_wire_names() {
        let result = ComparisonResult {
            left: "a.pdf".to_owned(),
            right: "b.pdf".to_owned(),
            result: 12.5,
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "left_file": "a.pdf",
                "right_file": "b.pdf",
                "difference_percentage": 12.5,
            })
        );
    }
}

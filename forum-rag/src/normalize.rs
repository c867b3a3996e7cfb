//! Text normalization applied to post content before budgeting and embedding.

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern is valid"));

/// Normalize post text for embedding.
///
/// Applied in order: every whitespace run becomes one ASCII space, the
/// artifact `". ,"` is removed, `".."` collapses to `"."`, `". ."` collapses
/// to `"."`, newlines are deleted. The sequence is repeated until it no longer
/// changes the text (a removal can expose a new artifact), then the result is
/// trimmed. This makes the function idempotent. Never fails; whitespace-only
/// input yields an empty string.
///
/// # Example
///
/// ```rust
/// use forum_rag::normalize_text;
///
/// assert_eq!(normalize_text("  부스  판매..\n경험담 . , "), "부스 판매. 경험담");
/// ```
pub fn normalize_text(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}

fn normalize_pass(text: &str) -> String {
    let mut s = WHITESPACE_RUN.replace_all(text, " ").into_owned();
    s = s.replace(". ,", "");
    while s.contains("..") {
        s = s.replace("..", ".");
    }
    s = s.replace(". .", ".");
    s.replace('\n', "")
}

//! Snippet extraction around query hits.

use sift_core::Document;

use crate::query::QueryExpr;

/// Build a snippet for a matched document.
///
/// Looks for the first highlight term in the content, then in the name.
/// Falls back to the start of the content when nothing is found.
pub fn for_document(doc: &Document, expr: &QueryExpr, max_len: usize) -> Option<String> {
    if max_len == 0 {
        return None;
    }

    for needle in expr.highlight_terms() {
        if let Some(snippet) = find_snippet_in_text(&doc.content, needle, max_len) {
            return Some(snippet);
        }
    }

    if doc.content.is_empty() {
        return None;
    }
    if doc.content.len() > max_len {
        let end = floor_boundary(&doc.content, max_len);
        Some(format!("{}...", doc.content[..end].trim_end()))
    } else {
        Some(doc.content.clone())
    }
}

/// Find a snippet of text containing the query.
fn find_snippet_in_text(text: &str, query: &str, max_len: usize) -> Option<String> {
    if query.is_empty() || query == "*" {
        return None;
    }

    let pos = find_case_insensitive(text, query)?;

    // Calculate bounds
    let context = max_len / 4;
    let start = floor_boundary(text, pos.saturating_sub(context));
    let end = floor_boundary(text, (start + max_len).min(text.len()));

    // Find word boundaries
    let start = if start > 0 {
        text[..start]
            .rfind(char::is_whitespace)
            .map(|p| p + 1)
            .unwrap_or(start)
    } else {
        0
    };

    let end = if end < text.len() {
        text[end..]
            .find(char::is_whitespace)
            .map(|p| end + p)
            .unwrap_or(end)
    } else {
        text.len()
    };

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(text[start..end].trim());
    if end < text.len() {
        snippet.push_str("...");
    }

    Some(snippet)
}

/// Byte offset of `needle` in `text`, ignoring case.
fn find_case_insensitive(text: &str, needle: &str) -> Option<usize> {
    let lower = text.to_lowercase();
    let needle = needle.to_lowercase();
    if lower.len() == text.len() {
        return lower.find(&needle);
    }
    // Lowercasing changed byte lengths; walk char boundaries instead.
    text.char_indices()
        .map(|(i, _)| i)
        .find(|&i| text[i..].to_lowercase().starts_with(&needle))
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

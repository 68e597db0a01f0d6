//! Query expressions.
//!
//! A query string is parsed once into a [`QueryExpr`] that every backend
//! executes the same way:
//!
//! - bare words are terms, all of which must match (name, content or path)
//! - `"quoted text"` is a phrase that must appear in the name or content
//! - `name:value` restricts matches to names containing `value`
//! - `mime:type/subtype` (or `mimetype:`) restricts the media type;
//!   a trailing `/*` matches a whole family, e.g. `mime:image/*`
//! - an empty query or `*` matches every document
//!
//! # Example
//!
//! ```
//! use sift_index::QueryExpr;
//!
//! let expr = QueryExpr::parse(r#"invoice "quarterly report" mime:application/pdf"#).unwrap();
//! assert_eq!(expr.terms, vec!["invoice"]);
//! assert_eq!(expr.phrases, vec!["quarterly report"]);
//! ```

use sift_core::{Error, ResourceId, Result};

/// A field restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// The name must contain every word of the value.
    Name(String),
    /// The media type must equal the value, or start with it when the
    /// value ends in `/*`.
    MimeType(String),
}

impl Filter {
    /// Check a document's media type against a `MimeType` filter value.
    pub fn mime_matches(pattern: &str, mime_type: Option<&str>) -> bool {
        let Some(mime_type) = mime_type else {
            return false;
        };
        let mime_type = mime_type.to_lowercase();
        match pattern.strip_suffix('*') {
            Some(prefix) => mime_type.starts_with(prefix),
            None => mime_type == pattern,
        }
    }
}

/// Parsed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryExpr {
    /// Lowercased words that must all match.
    pub terms: Vec<String>,
    /// Lowercased phrases that must all match.
    pub phrases: Vec<String>,
    /// Field restrictions.
    pub filters: Vec<Filter>,
    /// Restrict to a single resource.
    pub resource: Option<ResourceId>,
}

impl QueryExpr {
    /// Parse a query string.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unbalanced quote or a field
    /// filter without a value.
    pub fn parse(query: &str) -> Result<Self> {
        let query = query.trim();
        if query.is_empty() || query == "*" {
            return Ok(Self::default());
        }

        let (phrases, remaining) = parse_phrases(query)?;
        let mut expr = Self {
            phrases: phrases.into_iter().map(|p| normalize(&p)).collect(),
            ..Default::default()
        };

        for word in remaining.split_whitespace() {
            match parse_filter(word)? {
                Some(filter) => expr.filters.push(filter),
                None if word == "*" => {}
                None => expr.terms.push(word.to_lowercase()),
            }
        }

        Ok(expr)
    }

    /// Restrict the query to one resource.
    pub fn restrict_to(mut self, resource: Option<ResourceId>) -> Self {
        self.resource = resource;
        self
    }

    /// True when the expression matches every document.
    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
            && self.phrases.is_empty()
            && self.filters.is_empty()
            && self.resource.is_none()
    }

    /// Canonical text form; structurally equal queries share it.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.terms.iter().map(|t| format!("t:{t}")));
        parts.extend(self.phrases.iter().map(|p| format!("p:{p}")));
        for filter in &self.filters {
            match filter {
                Filter::Name(v) => parts.push(format!("f:name={v}")),
                Filter::MimeType(v) => parts.push(format!("f:mime={v}")),
            }
        }
        if let Some(id) = &self.resource {
            parts.push(format!("r:{id}"));
        }
        parts.join("\u{1f}")
    }

    /// Words worth highlighting in a snippet, phrases first.
    pub fn highlight_terms(&self) -> Vec<&str> {
        let mut needles: Vec<&str> = self.phrases.iter().map(String::as_str).collect();
        needles.extend(self.terms.iter().map(String::as_str));
        for filter in &self.filters {
            if let Filter::Name(v) = filter {
                needles.push(v);
            }
        }
        needles
    }
}

/// Lowercase and collapse internal whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_filter(word: &str) -> Result<Option<Filter>> {
    let Some((field, value)) = word.split_once(':') else {
        return Ok(None);
    };
    let build: fn(String) -> Filter = match field.to_lowercase().as_str() {
        "name" => Filter::Name,
        "mime" | "mimetype" => Filter::MimeType,
        _ => return Ok(None),
    };
    if value.is_empty() {
        return Err(Error::invalid_argument(format!(
            "filter '{field}:' needs a value"
        )));
    }
    Ok(Some(build(value.to_lowercase())))
}

/// Parse quoted phrases from a query string.
///
/// Returns (phrases, remaining text without quotes).
fn parse_phrases(query: &str) -> Result<(Vec<String>, String)> {
    let mut phrases = Vec::new();
    let mut remaining = query.to_string();

    while let Some(start) = remaining.find('"') {
        let Some(end) = remaining[start + 1..].find('"') else {
            return Err(Error::invalid_argument("unbalanced quote in query"));
        };
        let phrase = remaining[start + 1..start + 1 + end].trim().to_string();
        if !phrase.is_empty() {
            phrases.push(phrase);
        }
        remaining = format!(
            "{} {}",
            &remaining[..start],
            &remaining[start + end + 2..]
        );
    }

    Ok((phrases, remaining))
}

/// Split text into lowercase alphanumeric words.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_and_wildcard() {
        assert!(QueryExpr::parse("").unwrap().is_match_all());
        assert!(QueryExpr::parse("   ").unwrap().is_match_all());
        assert!(QueryExpr::parse("*").unwrap().is_match_all());
    }

    #[test]
    fn test_parse_terms_lowercased() {
        let expr = QueryExpr::parse("Invoice QUARTERLY").unwrap();
        assert_eq!(expr.terms, vec!["invoice", "quarterly"]);
        assert!(expr.phrases.is_empty());
    }

    #[test]
    fn test_parse_phrase_and_terms() {
        let expr = QueryExpr::parse("\"Chord  Progression\" harmony").unwrap();
        assert_eq!(expr.phrases, vec!["chord progression"]);
        assert_eq!(expr.terms, vec!["harmony"]);
    }

    #[test]
    fn test_parse_adjacent_phrase_keeps_words_apart() {
        let expr = QueryExpr::parse("alpha\"beta\"gamma").unwrap();
        assert_eq!(expr.phrases, vec!["beta"]);
        assert_eq!(expr.terms, vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_parse_empty_quotes_ignored() {
        let expr = QueryExpr::parse("\"\" something").unwrap();
        assert!(expr.phrases.is_empty());
        assert_eq!(expr.terms, vec!["something"]);
    }

    #[test]
    fn test_parse_unbalanced_quote_rejected() {
        let err = QueryExpr::parse("\"unclosed phrase").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_parse_filters() {
        let expr = QueryExpr::parse("report name:Budget mime:image/* mimetype:text/plain").unwrap();
        assert_eq!(expr.terms, vec!["report"]);
        assert_eq!(
            expr.filters,
            vec![
                Filter::Name("budget".into()),
                Filter::MimeType("image/*".into()),
                Filter::MimeType("text/plain".into()),
            ]
        );
    }

    #[test]
    fn test_unknown_field_prefix_is_a_term() {
        let expr = QueryExpr::parse("https://example.com").unwrap();
        assert_eq!(expr.terms, vec!["https://example.com"]);
        assert!(expr.filters.is_empty());
    }

    #[test]
    fn test_filter_without_value_rejected() {
        assert!(QueryExpr::parse("name:").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_canonical_distinguishes_structure() {
        let a = QueryExpr::parse("alpha beta").unwrap();
        let b = QueryExpr::parse("\"alpha beta\"").unwrap();
        let c = QueryExpr::parse("  ALPHA   beta ").unwrap();
        assert_ne!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), c.canonical());
    }

    #[test]
    fn test_canonical_includes_resource_restriction() {
        let a = QueryExpr::parse("alpha").unwrap();
        let b = a.clone().restrict_to(Some("r1".into()));
        assert_ne!(a.canonical(), b.canonical());
        assert!(!b.is_match_all());
    }

    #[test]
    fn test_mime_matches() {
        assert!(Filter::mime_matches("image/*", Some("image/png")));
        assert!(Filter::mime_matches("text/plain", Some("Text/Plain")));
        assert!(!Filter::mime_matches("text/plain", Some("text/html")));
        assert!(!Filter::mime_matches("image/*", None));
    }

    #[test]
    fn test_tokenize() {
        let words: Vec<String> = tokenize("Q3-Invoice_final.PDF").collect();
        assert_eq!(words, vec!["q3", "invoice", "final", "pdf"]);
    }
}

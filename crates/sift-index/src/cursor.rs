//! Opaque pagination tokens.
//!
//! A page token is a tagged, versioned structure serialized as JSON and
//! wrapped in URL-safe base64. Every token carries the signature of the
//! query it was issued for, so a token replayed against a different query
//! is rejected instead of silently returning the wrong page.

use std::cmp::Ordering;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sift_core::{Error, Match, ResourceId, Result, SpaceId};

use crate::query::QueryExpr;

/// Current token format version.
pub const CURSOR_VERSION: u8 = 1;

/// Which service issued a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// Single-space token from an index provider.
    Space,
    /// Multi-space token from the search provider.
    Aggregate,
}

/// Stable signature of a parsed query.
pub fn query_signature(expr: &QueryExpr) -> String {
    let hash = blake3::hash(expr.canonical().as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Serialize a token structure.
pub fn encode_token<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Deserialize a token structure.
///
/// # Errors
///
/// [`Error::InvalidCursor`] when the token is not valid base64 or JSON.
pub fn decode_token<T: DeserializeOwned>(token: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| Error::invalid_cursor(format!("malformed page token: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::invalid_cursor(format!("undecodable page token: {e}")))
}

/// Keyset position in `(score desc, resource_id asc)` order.
///
/// The score is kept as raw bits so it survives serialization exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    score_bits: u32,
    resource_id: ResourceId,
}

impl Position {
    /// Position of a ranked entry.
    pub fn new(score: f32, resource_id: ResourceId) -> Self {
        Self {
            score_bits: score.to_bits(),
            resource_id,
        }
    }

    /// Position of a match.
    pub fn of(m: &Match) -> Self {
        Self::new(m.score, m.resource.resource_id.clone())
    }

    /// Score at this position.
    pub fn score(&self) -> f32 {
        f32::from_bits(self.score_bits)
    }

    /// Resource at this position.
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// Order of an entry relative to this position.
    ///
    /// `Greater` means the entry comes after the position.
    pub fn cmp_entry(&self, score: f32, resource_id: &ResourceId) -> Ordering {
        rank_cmp(score, resource_id, self.score(), &self.resource_id)
    }
}

/// Global result order: score descending, then resource id ascending.
pub fn rank_cmp(
    a_score: f32,
    a_id: &ResourceId,
    b_score: f32,
    b_id: &ResourceId,
) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

/// [`rank_cmp`] over matches.
pub fn match_cmp(a: &Match, b: &Match) -> Ordering {
    rank_cmp(
        a.score,
        &a.resource.resource_id,
        b.score,
        &b.resource.resource_id,
    )
    .then_with(|| a.resource.space_id.cmp(&b.resource.space_id))
}

/// Page token issued by a single space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceCursor {
    v: u8,
    kind: CursorKind,
    sig: String,
    space: SpaceId,
    after: Position,
}

impl SpaceCursor {
    /// Token resuming after `after` for the given query and space.
    pub fn new(expr: &QueryExpr, space: SpaceId, after: Position) -> Self {
        Self {
            v: CURSOR_VERSION,
            kind: CursorKind::Space,
            sig: query_signature(expr),
            space,
            after,
        }
    }

    /// Encode to an opaque string.
    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    /// Decode a token and check it against the query and space.
    ///
    /// An empty token means "first page" and yields `None`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCursor`] for undecodable tokens, unknown versions,
    /// tokens of another kind, space or query.
    pub fn decode(token: &str, expr: &QueryExpr, space: &SpaceId) -> Result<Option<Position>> {
        if token.is_empty() {
            return Ok(None);
        }
        let cursor: Self = decode_token(token)?;
        if cursor.v != CURSOR_VERSION {
            return Err(Error::invalid_cursor(format!(
                "unsupported page token version {}",
                cursor.v
            )));
        }
        if cursor.kind != CursorKind::Space {
            return Err(Error::invalid_cursor("page token was not issued by a space index"));
        }
        if &cursor.space != space {
            return Err(Error::invalid_cursor("page token belongs to another space"));
        }
        if cursor.sig != query_signature(expr) {
            return Err(Error::invalid_cursor("page token belongs to a different query"));
        }
        Ok(Some(cursor.after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(q: &str) -> QueryExpr {
        QueryExpr::parse(q).unwrap()
    }

    #[test]
    fn test_space_cursor_accepts_same_query() {
        let e = expr("quarterly invoice");
        let pos = Position::new(1.25, "r7".into());
        let token = SpaceCursor::new(&e, "s1".into(), pos.clone())
            .encode()
            .unwrap();
        let decoded = SpaceCursor::decode(&token, &expr("Quarterly  INVOICE"), &"s1".into()).unwrap();
        assert_eq!(decoded, Some(pos));
    }

    #[test]
    fn test_space_cursor_rejects_other_query() {
        let token = SpaceCursor::new(&expr("a"), "s1".into(), Position::new(1.0, "r".into()))
            .encode()
            .unwrap();
        let err = SpaceCursor::decode(&token, &expr("b"), &"s1".into()).unwrap_err();
        assert!(matches!(err, Error::InvalidCursor(_)));
    }

    #[test]
    fn test_space_cursor_rejects_other_space() {
        let token = SpaceCursor::new(&expr("a"), "s1".into(), Position::new(1.0, "r".into()))
            .encode()
            .unwrap();
        let err = SpaceCursor::decode(&token, &expr("a"), &"s2".into()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = SpaceCursor::decode("not-a-token!!", &expr("a"), &"s1".into()).unwrap_err();
        assert!(matches!(err, Error::InvalidCursor(_)));
        let valid_b64_bad_json = URL_SAFE_NO_PAD.encode(b"{oops");
        let err = SpaceCursor::decode(&valid_b64_bad_json, &expr("a"), &"s1".into()).unwrap_err();
        assert!(matches!(err, Error::InvalidCursor(_)));
    }

    #[test]
    fn test_empty_token_is_first_page() {
        assert_eq!(SpaceCursor::decode("", &expr("a"), &"s1".into()).unwrap(), None);
    }

    #[test]
    fn test_position_score_is_exact() {
        let score = 0.1f32 + 0.2f32;
        let pos = Position::new(score, "r".into());
        let json = serde_json::to_string(&pos).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.score().to_bits(), score.to_bits());
    }

    #[test]
    fn test_rank_cmp_orders_score_then_id() {
        let a: ResourceId = "a".into();
        let b: ResourceId = "b".into();
        assert_eq!(rank_cmp(2.0, &b, 1.0, &a), Ordering::Less);
        assert_eq!(rank_cmp(1.0, &a, 1.0, &b), Ordering::Less);
        assert_eq!(rank_cmp(1.0, &b, 1.0, &b), Ordering::Equal);
    }

    #[test]
    fn test_position_cmp_entry() {
        let pos = Position::new(1.0, "m".into());
        assert_eq!(pos.cmp_entry(2.0, &"z".into()), Ordering::Less);
        assert_eq!(pos.cmp_entry(1.0, &"n".into()), Ordering::Greater);
        assert_eq!(pos.cmp_entry(0.5, &"a".into()), Ordering::Greater);
    }

    #[test]
    fn test_signature_is_stable() {
        assert_eq!(query_signature(&expr("x y")), query_signature(&expr("X  Y")));
        assert_eq!(query_signature(&expr("x")).len(), 32);
    }
}

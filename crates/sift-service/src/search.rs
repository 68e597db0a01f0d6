//! Aggregate search across every space a caller can read.
//!
//! A search resolves the caller's grants, fans the query out to the
//! provider of each granted space with a per-space timeout, merges the
//! answers into one `(score desc, resource_id asc)` order and cuts a page.
//!
//! # Pagination
//!
//! The aggregate page token records, per space, where the next unconsumed
//! match sits in that space's own paging: the space token of the page
//! holding it, its offset inside that page and the page size used. Resuming
//! re-fetches that page, skips what was already returned and continues.
//! Within a space nothing is returned twice or skipped; across spaces the
//! merge keeps the global order.
//!
//! Grants are resolved again for every page. A space whose grant was
//! revoked mid-pagination disappears from later pages; spaces granted after
//! the first page are not added.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sift_acl::AccessResolver;
use sift_core::{
    Error, IndexSpaceRequest, Match, Reference, Result, SearchIndexRequest, SearchRequest,
    SearchResponse, SearchSettings, SpaceId, UserId,
};
use sift_index::cursor::{CURSOR_VERSION, decode_token, encode_token};
use sift_index::{CursorKind, QueryExpr, match_cmp, query_signature};

use crate::provider::IndexProvider;
use crate::router::ProviderRouter;

/// Where one space stands in an aggregate pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ShardState {
    /// Space token of the page holding the next unconsumed match.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    token: String,
    /// Matches of that page already returned.
    #[serde(default)]
    skip: usize,
    /// Space page size the token was issued for.
    limit: usize,
    /// No matches left.
    #[serde(default)]
    done: bool,
    /// Last total reported by the space.
    #[serde(default)]
    total: i32,
}

impl ShardState {
    fn start(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

/// Page token issued by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AggregateCursor {
    v: u8,
    kind: CursorKind,
    sig: String,
    shards: BTreeMap<SpaceId, ShardState>,
    /// A space was left out on this or an earlier page.
    #[serde(default)]
    degraded: bool,
}

impl AggregateCursor {
    fn decode(token: &str, sig: &str) -> Result<Self> {
        let cursor: Self = decode_token(token)?;
        if cursor.v != CURSOR_VERSION {
            return Err(Error::invalid_cursor(format!(
                "unsupported page token version {}",
                cursor.v
            )));
        }
        if cursor.kind != CursorKind::Aggregate {
            return Err(Error::invalid_cursor(
                "page token was not issued by the search service",
            ));
        }
        if cursor.sig != sig {
            return Err(Error::invalid_cursor("page token belongs to a different query"));
        }
        Ok(cursor)
    }
}

/// A match together with where it sits in its space's paging.
struct Candidate {
    space_id: SpaceId,
    found: Match,
    page_token: String,
    index: usize,
    page_len: usize,
    next_token: String,
}

struct ShardPage {
    candidates: Vec<Candidate>,
    total: i32,
}

/// Fetch at least `want` unconsumed matches of one space, or all that are left.
async fn fetch_shard(
    provider: &dyn IndexProvider,
    space_id: &SpaceId,
    state: &ShardState,
    query: &str,
    want: usize,
) -> Result<ShardPage> {
    let limit = state.limit.max(1);
    let page_size = i32::try_from(limit).unwrap_or(i32::MAX);
    let mut token = state.token.clone();
    let mut skip = state.skip;
    let mut candidates = Vec::new();

    let total = loop {
        let response = provider
            .search(SearchIndexRequest {
                page_size,
                page_token: token.clone(),
                query: query.to_string(),
                reference: Reference::space(space_id.clone()),
            })
            .await?;

        let page_len = response.matches.len();
        for (index, found) in response.matches.into_iter().enumerate().skip(skip) {
            candidates.push(Candidate {
                space_id: space_id.clone(),
                found,
                page_token: token.clone(),
                index,
                page_len,
                next_token: response.next_page_token.clone(),
            });
        }

        if candidates.len() >= want || page_len == 0 || response.next_page_token.is_empty() {
            break response.total_matches;
        }
        token = response.next_page_token;
        skip = 0;
    };

    Ok(ShardPage { candidates, total })
}

/// User-scoped search over every granted space.
pub struct SearchProvider {
    access: Arc<dyn AccessResolver>,
    router: ProviderRouter,
    settings: SearchSettings,
}

impl SearchProvider {
    /// Search provider resolving grants with `access` and reaching spaces through `router`.
    pub fn new(
        access: Arc<dyn AccessResolver>,
        router: ProviderRouter,
        settings: SearchSettings,
    ) -> Self {
        Self {
            access,
            router,
            settings,
        }
    }

    /// Search settings in effect.
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Provider routing.
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Search every space the caller can read.
    ///
    /// A space that fails or exceeds the per-space timeout is left out of
    /// this and later pages and the response is marked degraded. Spaces that
    /// have never been indexed contribute nothing and do not degrade.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a bad page size or query
    /// - [`Error::InvalidCursor`] for a token of another query
    /// - [`Error::Unavailable`] when every targeted space failed
    pub async fn search(&self, caller: &UserId, request: SearchRequest) -> Result<SearchResponse> {
        let page_size = self.settings.validate_page_size(request.page_size)?;
        let expr = QueryExpr::parse(&request.query)?;
        let sig = query_signature(&expr);
        let granted = self.access.granted_spaces(caller).await?;

        let (mut shards, was_degraded): (BTreeMap<SpaceId, ShardState>, bool) =
            if request.page_token.is_empty() {
                let shards = granted
                    .iter()
                    .map(|space| (space.clone(), ShardState::start(page_size)))
                    .collect();
                (shards, false)
            } else {
                let cursor = AggregateCursor::decode(&request.page_token, &sig)?;
                let shards = cursor
                    .shards
                    .into_iter()
                    .filter(|(space, _)| {
                        let kept = granted.contains(space);
                        if !kept {
                            debug!("Dropping space '{space}' from pagination: no longer granted");
                        }
                        kept
                    })
                    .collect();
                (shards, cursor.degraded)
            };

        let pending: Vec<(SpaceId, ShardState)> = shards
            .iter()
            .filter(|(_, state)| !state.done)
            .map(|(space, state)| (space.clone(), state.clone()))
            .collect();
        debug!(
            "Fanning out '{}' for '{caller}' to {} of {} spaces",
            request.query,
            pending.len(),
            shards.len()
        );

        let timeout = self.settings.space_timeout();
        let query = request.query.as_str();
        let outcomes = join_all(pending.iter().map(|(space, state)| {
            let provider = self.router.route(space);
            async move {
                let fetched = tokio::time::timeout(
                    timeout,
                    fetch_shard(provider.as_ref(), space, state, query, page_size),
                )
                .await;
                (space, fetched)
            }
        }))
        .await;

        let mut pool: Vec<Candidate> = Vec::new();
        let mut failed = 0usize;
        for (space, fetched) in outcomes {
            let failure = match fetched {
                Ok(Ok(page)) => {
                    if let Some(stray) = page
                        .candidates
                        .iter()
                        .find(|c| &c.found.resource.space_id != space)
                    {
                        Some(format!(
                            "returned resource '{}' of space '{}'",
                            stray.found.resource.resource_id, stray.found.resource.space_id
                        ))
                    } else {
                        if let Some(state) = shards.get_mut(space) {
                            state.total = page.total;
                            state.done = page.candidates.is_empty();
                        }
                        pool.extend(page.candidates);
                        None
                    }
                }
                Ok(Err(e)) if e.is_not_found() => {
                    if let Some(state) = shards.get_mut(space) {
                        state.total = 0;
                        state.done = true;
                    }
                    None
                }
                Ok(Err(e)) if e.is_invalid_argument() => return Err(e),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {timeout:?}")),
            };
            if let Some(reason) = failure {
                warn!("Space '{space}' left out of search: {reason}");
                shards.remove(space);
                failed += 1;
            }
        }

        if !pending.is_empty() && failed == pending.len() {
            return Err(Error::unavailable(format!(
                "none of the {failed} targeted spaces could be searched"
            )));
        }

        pool.sort_by(|a, b| match_cmp(&a.found, &b.found));
        pool.truncate(page_size);

        // Candidates of one space appear in that space's own order, so the
        // last one seen per space is where that space resumes.
        for candidate in &pool {
            if let Some(state) = shards.get_mut(&candidate.space_id) {
                if candidate.index + 1 >= candidate.page_len {
                    state.token = candidate.next_token.clone();
                    state.skip = 0;
                    state.done = candidate.next_token.is_empty();
                } else {
                    state.token = candidate.page_token.clone();
                    state.skip = candidate.index + 1;
                }
            }
        }

        let degraded = was_degraded || failed > 0;
        let total: i64 = shards.values().map(|state| i64::from(state.total)).sum();
        let next_page_token = if shards.values().any(|state| !state.done) {
            encode_token(&AggregateCursor {
                v: CURSOR_VERSION,
                kind: CursorKind::Aggregate,
                sig,
                shards,
                degraded,
            })?
        } else {
            String::new()
        };

        let matches: Vec<Match> = pool
            .into_iter()
            .map(|candidate| candidate.found)
            .filter(|m| granted.contains(&m.resource.space_id))
            .collect();

        Ok(SearchResponse {
            matches,
            next_page_token,
            total_matches: i32::try_from(total).unwrap_or(i32::MAX),
            degraded,
        })
    }

    /// Rebuild a space on behalf of a caller.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] when the caller may neither read nor
    /// create resources in the space.
    pub async fn index_space(&self, caller: &UserId, request: IndexSpaceRequest) -> Result<()> {
        if request.space_id.is_empty() {
            return Err(Error::invalid_argument("space_id is required"));
        }
        if !self.access.can_index(caller, &request.space_id).await? {
            return Err(Error::permission_denied(format!(
                "'{caller}' may not index space '{}'",
                request.space_id
            )));
        }
        let provider = self.router.route(&request.space_id);
        debug!(
            "Indexing space '{}' through {} provider",
            request.space_id,
            provider.name()
        );
        provider.index_space(request).await
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Mock index provider for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sift_core::{
    Error, IndexSpaceRequest, Match, Result, SearchIndexRequest, SearchIndexResponse,
};
use sift_index::match_cmp;
use tokio::sync::Mutex;

use crate::provider::IndexProvider;

#[derive(Clone)]
enum Behavior {
    Canned(Arc<Vec<Match>>),
    Failing,
    NotFound,
}

/// Index provider that returns canned matches or canned failures.
///
/// Canned matches are served in rank order, paged by offset, whatever the
/// query. Useful for exercising fan-out without building indices.
#[derive(Clone)]
pub struct MockIndexProvider {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    indexed: Arc<Mutex<Vec<IndexSpaceRequest>>>,
}

impl MockIndexProvider {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            indexed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider answering every search with no matches.
    pub fn empty() -> Self {
        Self::with_matches(Vec::new())
    }

    /// Provider serving the given matches.
    pub fn with_matches(mut matches: Vec<Match>) -> Self {
        matches.sort_by(match_cmp);
        Self::with_behavior(Behavior::Canned(Arc::new(matches)))
    }

    /// Provider failing every call with [`Error::Unavailable`].
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Failing)
    }

    /// Provider reporting every space as never indexed.
    pub fn not_found() -> Self {
        Self::with_behavior(Behavior::NotFound)
    }

    /// Sleep before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of search calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Index requests received, in order.
    pub async fn indexed(&self) -> Vec<IndexSpaceRequest> {
        self.indexed.lock().await.clone()
    }
}

#[async_trait]
impl IndexProvider for MockIndexProvider {
    async fn search(&self, request: SearchIndexRequest) -> Result<SearchIndexResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let matches = match &self.behavior {
            Behavior::Canned(matches) => matches,
            Behavior::Failing => return Err(Error::unavailable("mock provider is down")),
            Behavior::NotFound => {
                return Err(Error::not_found(format!(
                    "space '{}' has no index",
                    request.reference.space_id
                )));
            }
        };

        let offset = if request.page_token.is_empty() {
            0
        } else {
            request
                .page_token
                .parse::<usize>()
                .map_err(|_| Error::invalid_cursor("mock token is an offset"))?
        };
        let size = usize::try_from(request.page_size.max(1)).unwrap_or(1);
        let end = (offset + size).min(matches.len());
        let page = matches.get(offset..end).unwrap_or_default().to_vec();
        let next_page_token = if end < matches.len() {
            end.to_string()
        } else {
            String::new()
        };

        Ok(SearchIndexResponse {
            matches: page,
            next_page_token,
            total_matches: i32::try_from(matches.len()).unwrap_or(i32::MAX),
        })
    }

    async fn index_space(&self, request: IndexSpaceRequest) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if matches!(self.behavior, Behavior::Failing) {
            return Err(Error::unavailable("mock provider is down"));
        }
        self.indexed.lock().await.push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        match self.behavior {
            Behavior::Failing => "mock-failing",
            _ => "mock",
        }
    }
}

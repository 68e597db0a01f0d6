//! Paging through an aggregate search yields every match exactly once, in
//! global `(score desc, resource_id asc)` order, whatever the page size and
//! however scores are spread over spaces.

use std::sync::Arc;

use proptest::prelude::*;
use sift_acl::StaticAccessResolver;
use sift_core::{Document, Match, SearchRequest, SearchSettings, UserId};
use sift_index::{MemoryIndexFactory, SpaceIndexManager, match_cmp};
use sift_ingest::{ChangeIngestor, MemoryStorage};
use sift_service::{LocalIndexProvider, MockIndexProvider, ProviderRouter, SearchProvider};

/// Per space, the score of each resource (as a repeat count of one word).
fn layout_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(1usize..6, 0..8), 1..5)
}

async fn build(layout: &[Vec<usize>]) -> SearchProvider {
    let manager = Arc::new(SpaceIndexManager::new(Arc::new(MemoryIndexFactory::new())));
    let access = Arc::new(StaticAccessResolver::default());
    for (s, scores) in layout.iter().enumerate() {
        let space = format!("space-{s}");
        access.grant("u", space.as_str());
        for (r, times) in scores.iter().enumerate() {
            let doc = Document::builder(space.as_str(), format!("r{r:02}"))
                .path(format!("r{r:02}.txt"))
                .content(vec!["word"; *times].join(" "))
                .sequence(1)
                .build();
            manager.upsert(&doc).await.unwrap();
        }
    }
    let ingestor = Arc::new(ChangeIngestor::new(
        manager,
        Arc::new(MemoryStorage::new()),
    ));
    let local = Arc::new(LocalIndexProvider::new(ingestor, SearchSettings::default()));
    SearchProvider::new(access, ProviderRouter::new(local), SearchSettings::default())
}

async fn collect(provider: &SearchProvider, page_size: i32) -> (Vec<Match>, usize) {
    let caller: UserId = "u".into();
    let mut seen = Vec::new();
    let mut token = String::new();
    let mut pages = 0;
    loop {
        let response = provider
            .search(&caller, SearchRequest::new("word", page_size).with_page_token(token))
            .await
            .unwrap();
        pages += 1;
        assert!(response.matches.len() <= page_size as usize);
        seen.extend(response.matches);
        if response.next_page_token.is_empty() {
            return (seen, pages);
        }
        token = response.next_page_token;
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn paging_is_complete_and_ordered(layout in layout_strategy(), page_size in 1i32..7) {
        let expected_count: usize = layout.iter().map(Vec::len).sum();
        let (seen, pages) = runtime().block_on(async {
            let provider = build(&layout).await;
            collect(&provider, page_size).await
        });

        prop_assert_eq!(seen.len(), expected_count);
        for pair in seen.windows(2) {
            prop_assert!(match_cmp(&pair[0], &pair[1]).is_lt());
        }
        let max_pages = expected_count.div_ceil(page_size as usize).max(1);
        prop_assert!(pages <= max_pages, "{} pages for {} matches", pages, expected_count);
    }

    #[test]
    fn canned_shards_merge_like_one_sorted_list(
        layout in layout_strategy(),
        page_size in 1i32..7,
    ) {
        let access = Arc::new(StaticAccessResolver::default());
        let mut router = ProviderRouter::new(Arc::new(MockIndexProvider::empty()));
        let mut everything = Vec::new();
        for (s, scores) in layout.iter().enumerate() {
            let space = format!("space-{s}");
            access.grant("u", space.as_str());
            let matches: Vec<Match> = scores
                .iter()
                .enumerate()
                .map(|(r, score)| {
                    let doc = Document::builder(space.as_str(), format!("r{r:02}")).build();
                    Match::from_document(&doc, *score as f32, None)
                })
                .collect();
            everything.extend(matches.iter().cloned());
            router = router.with_route(space.as_str(), Arc::new(MockIndexProvider::with_matches(matches)));
        }
        everything.sort_by(match_cmp);

        let provider = SearchProvider::new(access, router, SearchSettings::default());
        let (seen, _) = runtime().block_on(collect(&provider, page_size));
        prop_assert_eq!(seen, everything);
    }
}

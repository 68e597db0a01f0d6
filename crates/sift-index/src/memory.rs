//! In-memory document index.
//!
//! Always available. Used for tests, embedding and deployments that can
//! afford to rebuild indices on start. Scoring is a plain weighted term
//! count: name hits weigh 2, content hits 1, path hits 0.5, and every
//! matched phrase adds 1.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sift_core::{Document, ResourceId, Result, SpaceId};

use crate::backend::{DocumentIndex, IndexFactory, OpenedIndex, ScoredDocument};
use crate::query::{Filter, QueryExpr, tokenize};

const NAME_WEIGHT: f32 = 2.0;
const CONTENT_WEIGHT: f32 = 1.0;
const PATH_WEIGHT: f32 = 0.5;
const PHRASE_WEIGHT: f32 = 1.0;

/// Document index held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: RwLock<BTreeMap<ResourceId, Document>>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ResourceId, Document>> {
        self.documents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResourceId, Document>> {
        self.documents.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentIndex for MemoryIndex {
    fn upsert(&self, document: &Document) -> Result<()> {
        self.write()
            .insert(document.resource.resource_id.clone(), document.clone());
        Ok(())
    }

    fn upsert_batch(&self, documents: &[Document]) -> Result<()> {
        let mut guard = self.write();
        for document in documents {
            guard.insert(document.resource.resource_id.clone(), document.clone());
        }
        Ok(())
    }

    fn delete(&self, resource_id: &ResourceId) -> Result<()> {
        self.write().remove(resource_id);
        Ok(())
    }

    fn search(&self, query: &QueryExpr) -> Result<Vec<ScoredDocument>> {
        let guard = self.read();
        Ok(guard
            .values()
            .filter_map(|doc| {
                score(doc, query).map(|score| ScoredDocument {
                    score,
                    document: doc.clone(),
                })
            })
            .collect())
    }

    fn versions(&self) -> Result<Vec<(ResourceId, u64)>> {
        Ok(self
            .read()
            .values()
            .map(|d| (d.resource.resource_id.clone(), d.sequence))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read().len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Score a document, or `None` when it does not match.
fn score(doc: &Document, query: &QueryExpr) -> Option<f32> {
    if let Some(id) = &query.resource {
        if &doc.resource.resource_id != id {
            return None;
        }
    }

    let name_words: Vec<String> = tokenize(&doc.name).collect();
    for filter in &query.filters {
        let passes = match filter {
            Filter::Name(value) => tokenize(value).all(|w| name_words.contains(&w)),
            Filter::MimeType(pattern) => Filter::mime_matches(pattern, doc.mime_type.as_deref()),
        };
        if !passes {
            return None;
        }
    }

    if query.terms.is_empty() && query.phrases.is_empty() {
        return Some(1.0);
    }

    let content_words: Vec<String> = tokenize(&doc.content).collect();
    let path_words: Vec<String> = tokenize(&doc.resource.path).collect();
    let mut total = 0.0f32;
    for term in &query.terms {
        for word in tokenize(term) {
            let hits = NAME_WEIGHT * count(&name_words, &word)
                + CONTENT_WEIGHT * count(&content_words, &word)
                + PATH_WEIGHT * count(&path_words, &word);
            if hits == 0.0 {
                return None;
            }
            total += hits;
        }
    }

    let name_text = name_words.join(" ");
    let content_text = content_words.join(" ");
    for phrase in &query.phrases {
        let phrase: String = tokenize(phrase).collect::<Vec<_>>().join(" ");
        if !contains_words(&name_text, &phrase) && !contains_words(&content_text, &phrase) {
            return None;
        }
        total += PHRASE_WEIGHT;
    }

    Some(total)
}

fn count(words: &[String], word: &str) -> f32 {
    words.iter().filter(|w| w.as_str() == word).count() as f32
}

/// Whole-word containment of a space-joined word sequence.
fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Factory producing [`MemoryIndex`] generations; nothing is persisted.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndexFactory;

impl MemoryIndexFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self
    }
}

impl IndexFactory for MemoryIndexFactory {
    fn open(&self, _space_id: &SpaceId) -> Result<Option<OpenedIndex>> {
        Ok(None)
    }

    fn create(&self, _space_id: &SpaceId, _generation: u64) -> Result<Arc<dyn DocumentIndex>> {
        Ok(Arc::new(MemoryIndex::new()))
    }

    fn publish(&self, _space_id: &SpaceId, _generation: u64, _document_count: usize) -> Result<()> {
        Ok(())
    }

    fn discard(&self, _space_id: &SpaceId, _generation: u64) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

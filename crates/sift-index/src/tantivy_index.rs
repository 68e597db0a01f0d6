//! Persistent document index using Tantivy.
//!
//! Every space generation is its own Tantivy index directory. Queries are
//! translated from [`QueryExpr`] into Tantivy query trees:
//! - BM25 scoring over `name`, `content` and `path`, weighted 2.0 / 1.0 / 0.5
//! - every term is required, matched in any of the three fields
//! - phrases match in `name` or `content`
//! - `name:` and `mime:` filters narrow the result without extra ranking
//!
//! Writes commit immediately and reload the reader, so a successful
//! `upsert` is visible to the next query.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sift_core::{Document, Error, ResourceId, Result, SpaceId};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, Occur, PhraseQuery, Query, RegexQuery, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer, TokenStream,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::backend::{DocumentIndex, IndexFactory, OpenedIndex, ScoredDocument};
use crate::persistence::{self, SpaceMetadata};
use crate::query::{Filter, QueryExpr};

/// Name of the registered text analyzer.
pub const TOKENIZER_NAME: &str = "sift_text";

const WRITER_MEMORY_BYTES: usize = 20_000_000;
const NAME_BOOST: f32 = 2.0;
const CONTENT_BOOST: f32 = 1.0;
const PATH_BOOST: f32 = 0.5;

// ============================================================================
// Schema
// ============================================================================

/// Field handles of the document schema.
#[derive(Debug, Clone)]
pub struct SiftSchema {
    schema: Schema,
    pub space_id: Field,
    pub resource_id: Field,
    pub path: Field,
    pub name: Field,
    pub content: Field,
    pub mime_type: Field,
    pub etag: Field,
    pub size: Field,
    pub mtime: Field,
    pub sequence: Field,
}

impl SiftSchema {
    /// Build the schema.
    pub fn build() -> Self {
        let mut builder = Schema::builder();

        let text = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_NAME)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let space_id = builder.add_text_field("space_id", STORED);
        let resource_id = builder.add_text_field("resource_id", STRING | STORED);
        let path = builder.add_text_field("path", text.clone());
        let name = builder.add_text_field("name", text.clone());
        let content = builder.add_text_field("content", text);
        let mime_type = builder.add_text_field("mime_type", STRING | STORED);
        let etag = builder.add_text_field("etag", STORED);
        let size = builder.add_u64_field("size", STORED);
        let mtime = builder.add_i64_field("mtime", STORED);
        let sequence = builder.add_u64_field("sequence", STORED);

        Self {
            schema: builder.build(),
            space_id,
            resource_id,
            path,
            name,
            content,
            mime_type,
            etag,
            size,
            mtime,
            sequence,
        }
    }

    /// The Tantivy schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Register the custom analyzer on an index.
    pub fn register_tokenizers(index: &Index) {
        index.tokenizers().register(TOKENIZER_NAME, analyzer());
    }

    fn to_tantivy(&self, doc: &Document) -> TantivyDocument {
        let mut out = TantivyDocument::default();
        out.add_text(self.space_id, doc.resource.space_id.as_str());
        out.add_text(self.resource_id, doc.resource.resource_id.as_str());
        out.add_text(self.path, &doc.resource.path);
        out.add_text(self.name, &doc.name);
        out.add_text(self.content, &doc.content);
        if let Some(mime_type) = &doc.mime_type {
            out.add_text(self.mime_type, mime_type.to_lowercase());
        }
        out.add_text(self.etag, &doc.etag);
        out.add_u64(self.size, doc.size);
        if let Some(mtime) = doc.mtime {
            out.add_i64(self.mtime, mtime.timestamp_millis());
        }
        out.add_u64(self.sequence, doc.sequence);
        out
    }

    fn from_tantivy(&self, doc: &TantivyDocument) -> Document {
        let text = |field| get_text_field(doc, field).unwrap_or_default();
        let mut builder = Document::builder(text(self.space_id), text(self.resource_id))
            .path(text(self.path))
            .name(text(self.name))
            .content(text(self.content))
            .etag(text(self.etag))
            .size(doc.get_first(self.size).and_then(|v| v.as_u64()).unwrap_or(0))
            .sequence(
                doc.get_first(self.sequence)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            );
        if let Some(mime_type) = get_text_field(doc, self.mime_type) {
            builder = builder.mime_type(mime_type);
        }
        if let Some(mtime) = doc
            .get_first(self.mtime)
            .and_then(|v| v.as_i64())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        {
            builder = builder.mtime(mtime);
        }
        builder.build()
    }
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Tokenize text through the same analyzer used for indexing.
fn analyze(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut tokens = Vec::new();
    let mut stream = analyzer.token_stream(text);
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}

fn get_text_field(doc: &TantivyDocument, field: Field) -> Option<String> {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn tantivy_err(context: &str) -> impl FnOnce(tantivy::TantivyError) -> Error + '_ {
    move |e| Error::internal(format!("{context}: {e}"))
}

// ============================================================================
// Query translation
// ============================================================================

fn term_query(field: Field, token: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, token),
        IndexRecordOption::WithFreqs,
    ))
}

/// A token that may appear in any of the weighted fields.
fn any_field(schema: &SiftSchema, token: &str) -> Box<dyn Query> {
    let clauses: Vec<(Occur, Box<dyn Query>)> = [
        (schema.name, NAME_BOOST),
        (schema.content, CONTENT_BOOST),
        (schema.path, PATH_BOOST),
    ]
    .into_iter()
    .map(|(field, boost)| {
        let q: Box<dyn Query> = Box::new(BoostQuery::new(term_query(field, token), boost));
        (Occur::Should, q)
    })
    .collect();
    Box::new(BooleanQuery::new(clauses))
}

fn phrase_in(field: Field, tokens: &[String]) -> Box<dyn Query> {
    if tokens.len() == 1 {
        return term_query(field, &tokens[0]);
    }
    let terms = tokens
        .iter()
        .map(|t| Term::from_field_text(field, t))
        .collect();
    Box::new(PhraseQuery::new(terms))
}

/// Escape regex metacharacters in a literal.
fn regex_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translate a parsed query.
fn build_query(schema: &SiftSchema, expr: &QueryExpr) -> Result<Box<dyn Query>> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    for term in &expr.terms {
        for token in analyze(term) {
            clauses.push((Occur::Must, any_field(schema, &token)));
        }
    }

    for phrase in &expr.phrases {
        let tokens = analyze(phrase);
        if tokens.is_empty() {
            continue;
        }
        let either: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Should, phrase_in(schema.name, &tokens)),
            (Occur::Should, phrase_in(schema.content, &tokens)),
        ];
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(either))));
    }

    for filter in &expr.filters {
        match filter {
            Filter::Name(value) => {
                for token in analyze(value) {
                    clauses.push((Occur::Must, term_query(schema.name, &token)));
                }
            }
            Filter::MimeType(pattern) => {
                let q: Box<dyn Query> = match pattern.strip_suffix('*') {
                    Some(prefix) => Box::new(
                        RegexQuery::from_pattern(
                            &format!("{}.*", regex_escape(prefix)),
                            schema.mime_type,
                        )
                        .map_err(|e| Error::invalid_argument(format!("bad mime filter: {e}")))?,
                    ),
                    None => Box::new(TermQuery::new(
                        Term::from_field_text(schema.mime_type, pattern),
                        IndexRecordOption::Basic,
                    )),
                };
                clauses.push((Occur::Must, q));
            }
        }
    }

    if let Some(id) = &expr.resource {
        clauses.push((
            Occur::Must,
            Box::new(TermQuery::new(
                Term::from_field_text(schema.resource_id, id.as_str()),
                IndexRecordOption::Basic,
            )),
        ));
    }

    if clauses.is_empty() {
        return Ok(Box::new(AllQuery));
    }
    Ok(Box::new(BooleanQuery::new(clauses)))
}

// ============================================================================
// Index
// ============================================================================

/// One Tantivy index generation of one space.
pub struct TantivyIndex {
    dir: PathBuf,
    index: Index,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    schema: SiftSchema,
    retired: AtomicBool,
}

impl TantivyIndex {
    /// Create a fresh index in an empty directory.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io_with_path(e, dir))?;
        let schema = SiftSchema::build();
        let index = Index::create_in_dir(dir, schema.schema().clone())
            .map_err(tantivy_err("failed to create index"))?;
        Self::from_index(dir, index, schema)
    }

    /// Open an existing index directory.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            return Err(Error::not_found(format!("index {}", dir.display())));
        }
        let index = Index::open_in_dir(dir).map_err(tantivy_err("failed to open index"))?;
        Self::from_index(dir, index, SiftSchema::build())
    }

    fn from_index(dir: &Path, index: Index, schema: SiftSchema) -> Result<Self> {
        SiftSchema::register_tokenizers(&index);
        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_MEMORY_BYTES)
            .map_err(tantivy_err("failed to create writer"))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(tantivy_err("failed to create reader"))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            reader,
            writer: Mutex::new(Some(writer)),
            schema,
            retired: AtomicBool::new(false),
        })
    }

    /// Directory of this generation.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `f` against the writer, then commit and reload the reader.
    fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&IndexWriter, &SiftSchema) -> Result<()>,
    {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::internal("index writer already closed"))?;
        if let Err(e) = f(writer, &self.schema) {
            let _ = writer.rollback();
            return Err(e);
        }
        writer.commit().map_err(tantivy_err("commit failed"))?;
        self.reader
            .reload()
            .map_err(tantivy_err("reader reload failed"))?;
        Ok(())
    }

    fn all_documents(&self) -> Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let count = searcher
            .search(&AllQuery, &Count)
            .map_err(tantivy_err("count failed"))?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let hits = searcher
            .search(&AllQuery, &TopDocs::with_limit(count))
            .map_err(tantivy_err("scan failed"))?;
        hits.into_iter()
            .map(|(_, address)| {
                searcher
                    .doc(address)
                    .map_err(tantivy_err("failed to retrieve document"))
            })
            .collect()
    }
}

impl DocumentIndex for TantivyIndex {
    fn upsert(&self, document: &Document) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(document))
    }

    fn upsert_batch(&self, documents: &[Document]) -> Result<()> {
        self.write(|writer, schema| {
            for document in documents {
                writer.delete_term(Term::from_field_text(
                    schema.resource_id,
                    document.resource.resource_id.as_str(),
                ));
                writer
                    .add_document(schema.to_tantivy(document))
                    .map_err(tantivy_err("failed to add document"))?;
            }
            Ok(())
        })
    }

    fn delete(&self, resource_id: &ResourceId) -> Result<()> {
        self.write(|writer, schema| {
            writer.delete_term(Term::from_field_text(
                schema.resource_id,
                resource_id.as_str(),
            ));
            Ok(())
        })
    }

    fn search(&self, query: &QueryExpr) -> Result<Vec<ScoredDocument>> {
        let query = build_query(&self.schema, query)?;
        let searcher = self.reader.searcher();
        let count = searcher
            .search(query.as_ref(), &Count)
            .map_err(tantivy_err("count failed"))?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let hits = searcher
            .search(query.as_ref(), &TopDocs::with_limit(count))
            .map_err(tantivy_err("search failed"))?;

        let mut out = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(tantivy_err("failed to retrieve document"))?;
            out.push(ScoredDocument {
                score,
                document: self.schema.from_tantivy(&doc),
            });
        }
        Ok(out)
    }

    fn versions(&self) -> Result<Vec<(ResourceId, u64)>> {
        Ok(self
            .all_documents()?
            .iter()
            .filter_map(|doc| {
                let id = get_text_field(doc, self.schema.resource_id)?;
                let seq = doc.get_first(self.schema.sequence).and_then(|v| v.as_u64())?;
                Some((ResourceId::from(id), seq))
            })
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "tantivy"
    }
}

impl Drop for TantivyIndex {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::SeqCst) {
            return;
        }
        // The writer holds the directory lock; release it before removal.
        let writer = self
            .writer
            .get_mut()
            .map(Option::take)
            .unwrap_or_else(|e| e.into_inner().take());
        drop(writer);
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("Removed retired index generation {}", self.dir.display()),
            Err(e) => warn!(
                "Failed to remove retired index generation {}: {e}",
                self.dir.display()
            ),
        }
    }
}

impl std::fmt::Debug for TantivyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyIndex")
            .field("dir", &self.dir)
            .field("segments", &self.index.searchable_segment_ids().map(|s| s.len()).ok())
            .finish()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Creates Tantivy generations under `<root>/spaces/<hash>/gen-<n>`.
#[derive(Debug, Clone)]
pub struct TantivyIndexFactory {
    root: PathBuf,
}

impl TantivyIndexFactory {
    /// Factory rooted at the service data path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every generation directory except `keep`.
    fn remove_stale_generations(space_dir: &Path, keep: u64) {
        let Ok(entries) = std::fs::read_dir(space_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(generation) = name.to_str().and_then(persistence::parse_generation_dir)
            else {
                continue;
            };
            if generation == keep {
                continue;
            }
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                warn!(
                    "Failed to remove stale generation {}: {e}",
                    entry.path().display()
                );
            }
        }
    }
}

impl IndexFactory for TantivyIndexFactory {
    fn open(&self, space_id: &SpaceId) -> Result<Option<OpenedIndex>> {
        let space_dir = persistence::space_dir(&self.root, space_id);
        let Some(metadata) = persistence::load_metadata(&space_dir)? else {
            return Ok(None);
        };
        if &metadata.space_id != space_id {
            return Err(Error::internal(format!(
                "space directory {} belongs to '{}', not '{space_id}'",
                space_dir.display(),
                metadata.space_id
            )));
        }

        let gen_dir = persistence::generation_dir(&space_dir, metadata.generation);
        if !gen_dir.exists() {
            warn!(
                "Space '{space_id}' names missing generation {}; treating it as absent",
                metadata.generation
            );
            return Ok(None);
        }

        let index = TantivyIndex::open(&gen_dir)?;
        Self::remove_stale_generations(&space_dir, metadata.generation);
        info!(
            "Opened space '{space_id}' generation {} ({} documents)",
            metadata.generation, metadata.document_count
        );
        Ok(Some(OpenedIndex {
            generation: metadata.generation,
            index: Arc::new(index),
        }))
    }

    fn create(&self, space_id: &SpaceId, generation: u64) -> Result<Arc<dyn DocumentIndex>> {
        let space_dir = persistence::space_dir(&self.root, space_id);
        let gen_dir = persistence::generation_dir(&space_dir, generation);
        if gen_dir.exists() {
            std::fs::remove_dir_all(&gen_dir).map_err(|e| Error::io_with_path(e, &gen_dir))?;
        }
        Ok(Arc::new(TantivyIndex::create(&gen_dir)?))
    }

    fn publish(&self, space_id: &SpaceId, generation: u64, document_count: usize) -> Result<()> {
        let space_dir = persistence::space_dir(&self.root, space_id);
        persistence::save_metadata(
            &space_dir,
            &SpaceMetadata {
                space_id: space_id.clone(),
                generation,
                backend: self.name().to_string(),
                document_count,
                published_at: Utc::now().to_rfc3339(),
            },
        )
    }

    fn discard(&self, space_id: &SpaceId, generation: u64) -> Result<()> {
        let space_dir = persistence::space_dir(&self.root, space_id);
        let gen_dir = persistence::generation_dir(&space_dir, generation);
        if gen_dir.exists() {
            std::fs::remove_dir_all(&gen_dir).map_err(|e| Error::io_with_path(e, &gen_dir))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tantivy"
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Tantivy full-text index over decisions.
//!
//! Three analyzed fields (title, regeste, full_text) share the `legal_text`
//! analyzer: simple tokenization, 40-char cap, lowercasing, ascii folding.
//! Queries tokenized by [`crate::text`] therefore match index terms for the
//! same surface form, diacritics included. Categorical fields and statute
//! keys use `raw_folded`, a single-token analyzer with the same case and
//! diacritic treatment, so exact filters stay insensitive too.

use std::path::PathBuf;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::tokenizer::{
    AsciiFoldingFilter, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, TextAnalyzer,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError, Term};
use thiserror::Error;

use crate::decision::{Decision, DecisionId};
use crate::query::{normalize_docket, QueryFilters};

const LEGAL_TEXT: &str = "legal_text";
const RAW_FOLDED: &str = "raw_folded";
const WRITER_BUFFER: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum TextIndexError {
    #[error("Index initialization failed: {0}")]
    Initialization(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Index is read-only")]
    ReadOnly,

    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Query parsing error: {0}")]
    QueryParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),
}

struct Fields {
    id: Field,
    docket: Field,
    court: Field,
    canton: Field,
    chamber: Field,
    language: Field,
    decision_type: Field,
    statutes: Field,
    title: Field,
    regeste: Field,
    full_text: Field,
    decision_date: Field,
}

impl Fields {
    fn from_schema(schema: &Schema) -> Result<Self, TextIndexError> {
        let get = |name: &str| {
            schema.get_field(name).map_err(|_| {
                TextIndexError::Initialization(format!("Missing '{name}' field in schema"))
            })
        };
        Ok(Self {
            id: get("id")?,
            docket: get("docket")?,
            court: get("court")?,
            canton: get("canton")?,
            chamber: get("chamber")?,
            language: get("language")?,
            decision_type: get("decision_type")?,
            statutes: get("statutes")?,
            title: get("title")?,
            regeste: get("regeste")?,
            full_text: get("full_text")?,
            decision_date: get("decision_date")?,
        })
    }
}

/// Tantivy index wrapper. Writing happens at corpus-build time; serving
/// opens the index read-only and never takes the writer lock.
pub struct TextIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    fields: Fields,
    #[allow(dead_code)]
    index_path: PathBuf,
}

impl TextIndex {
    /// Open for writing, creating the index when the directory holds none.
    pub fn new(index_path: PathBuf) -> Result<Self, TextIndexError> {
        if index_path.join("meta.json").exists() {
            Self::open(index_path, true)
        } else {
            Self::create(index_path)
        }
    }

    /// Open an existing index for serving. No writer is created, so this
    /// never contends for the writer lock.
    pub fn open_read(index_path: PathBuf) -> Result<Self, TextIndexError> {
        if !index_path.join("meta.json").exists() {
            return Err(TextIndexError::NotFound(index_path.display().to_string()));
        }
        Self::open(index_path, false)
    }

    fn create(index_path: PathBuf) -> Result<Self, TextIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let schema = build_schema();
        let index = Index::create_in_dir(&index_path, schema.clone())
            .map_err(|e| TextIndexError::Initialization(e.to_string()))?;
        register_analyzers(&index);

        let writer = index
            .writer(WRITER_BUFFER)
            .map_err(|e| TextIndexError::Initialization(e.to_string()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| TextIndexError::Initialization(e.to_string()))?;
        let fields = Fields::from_schema(&schema)?;

        Ok(Self {
            index,
            reader,
            writer: Some(writer),
            fields,
            index_path,
        })
    }

    fn open(index_path: PathBuf, writable: bool) -> Result<Self, TextIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| TextIndexError::Initialization(e.to_string()))?;
        // analyzers are not persisted with the schema and must be
        // re-registered on every open
        register_analyzers(&index);

        let writer = if writable {
            Some(
                index
                    .writer(WRITER_BUFFER)
                    .map_err(|e| TextIndexError::Initialization(e.to_string()))?,
            )
        } else {
            None
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| TextIndexError::Initialization(e.to_string()))?;
        let fields = Fields::from_schema(&index.schema())?;

        Ok(Self {
            index,
            reader,
            writer,
            fields,
            index_path,
        })
    }

    /// Index one decision. `statute_keys` are the canonical citation keys
    /// extracted from its text ("art 8 bv").
    pub fn add_decision(
        &mut self,
        decision: &Decision,
        statute_keys: &[String],
    ) -> Result<(), TextIndexError> {
        let writer = self.writer.as_mut().ok_or(TextIndexError::ReadOnly)?;

        let mut doc = TantivyDocument::default();
        doc.add_i64(self.fields.id, decision.id);
        doc.add_text(self.fields.docket, normalize_docket(&decision.docket_number));
        doc.add_text(self.fields.court, &decision.court);
        doc.add_text(self.fields.canton, &decision.canton);
        doc.add_text(self.fields.chamber, &decision.chamber);
        doc.add_text(self.fields.language, &decision.language);
        doc.add_text(self.fields.decision_type, &decision.decision_type);
        for key in statute_keys {
            doc.add_text(self.fields.statutes, key);
        }
        doc.add_text(self.fields.title, &decision.title);
        doc.add_text(self.fields.regeste, &decision.regeste);
        doc.add_text(self.fields.full_text, &decision.full_text);
        doc.add_date(self.fields.decision_date, date_value(decision.decision_date));

        writer
            .add_document(doc)
            .map_err(|e| TextIndexError::Insert(e.to_string()))?;
        Ok(())
    }

    /// Remove a decision by id. Takes effect at the next commit.
    pub fn delete_decision(&mut self, id: DecisionId) -> Result<(), TextIndexError> {
        let writer = self.writer.as_mut().ok_or(TextIndexError::ReadOnly)?;
        writer.delete_term(Term::from_field_i64(self.fields.id, id));
        Ok(())
    }

    /// Commit pending changes and wait for the reader to pick them up.
    pub fn commit(&mut self) -> Result<(), TextIndexError> {
        let writer = self.writer.as_mut().ok_or(TextIndexError::ReadOnly)?;
        writer
            .commit()
            .map_err(|e| TextIndexError::Insert(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| TextIndexError::Search(e.to_string()))?;
        Ok(())
    }

    /// Run one strategy query. Hard filters are folded into the parsed query
    /// as required clauses, so every strategy sees identical constraints.
    ///
    /// Returns (id, BM25 score) pairs in native rank order.
    pub fn search(
        &self,
        query_str: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<(DecisionId, f32)>, TextIndexError> {
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.title, self.fields.regeste, self.fields.full_text],
        );
        parser.set_field_boost(self.fields.title, 2.0);
        parser.set_field_boost(self.fields.regeste, 1.5);

        let constrained = apply_filters(query_str, filters);
        let query = parser
            .parse_query(&constrained)
            .map_err(|e| TextIndexError::QueryParse(e.to_string()))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| TextIndexError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| TextIndexError::Search(e.to_string()))?;
            let id = doc
                .get_first(self.fields.id)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| TextIndexError::Search("Missing or invalid id field".to_string()))?;
            hits.push((id, score));
        }
        Ok(hits)
    }

    /// Number of indexed decisions.
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    let analyzed = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(LEGAL_TEXT)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let keyword = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(RAW_FOLDED)
                .set_index_option(IndexRecordOption::Basic),
        )
        .set_stored();

    builder.add_i64_field("id", INDEXED | STORED | FAST);
    builder.add_text_field("docket", keyword.clone());
    builder.add_text_field("court", keyword.clone());
    builder.add_text_field("canton", keyword.clone());
    builder.add_text_field("chamber", keyword.clone());
    builder.add_text_field("language", keyword.clone());
    builder.add_text_field("decision_type", keyword.clone());
    builder.add_text_field("statutes", keyword);
    builder.add_text_field("title", analyzed.clone());
    builder.add_text_field("regeste", analyzed.clone());
    builder.add_text_field("full_text", analyzed);
    builder.add_date_field("decision_date", INDEXED | STORED | FAST);

    builder.build()
}

fn register_analyzers(index: &Index) {
    let legal_text = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build();
    index.tokenizers().register(LEGAL_TEXT, legal_text);

    let raw_folded = TextAnalyzer::builder(RawTokenizer::default())
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build();
    index.tokenizers().register(RAW_FOLDED, raw_folded);
}

fn date_value(date: chrono::NaiveDate) -> tantivy::DateTime {
    let seconds = date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    tantivy::DateTime::from_timestamp_secs(seconds)
}

/// Wrap the strategy query and AND in one required clause per filter.
/// Values are quoted so multi-word chambers stay single raw terms.
fn apply_filters(query: &str, filters: &QueryFilters) -> String {
    if filters.is_empty() {
        return query.to_string();
    }

    let mut clauses = vec![format!("+({query})")];
    let mut categorical = |field: &str, value: &Option<String>| {
        if let Some(v) = value {
            clauses.push(format!("+{field}:\"{}\"", v.replace('"', "")));
        }
    };
    categorical("court", &filters.court);
    categorical("canton", &filters.canton);
    categorical("language", &filters.language);
    categorical("chamber", &filters.chamber);
    categorical("decision_type", &filters.decision_type);

    if filters.date_from.is_some() || filters.date_to.is_some() {
        let from = filters
            .date_from
            .map(|d| format!("{}T00:00:00Z", d.format("%Y-%m-%d")))
            .unwrap_or_else(|| "*".to_string());
        let to = filters
            .date_to
            .map(|d| format!("{}T23:59:59Z", d.format("%Y-%m-%d")))
            .unwrap_or_else(|| "*".to_string());
        clauses.push(format!("+decision_date:[{from} TO {to}]"));
    }

    clauses.join(" ")
}

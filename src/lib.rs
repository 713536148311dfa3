//! Iudex - Legal Decision Search Engine
//!
//! Full-text search and relevance ranking over a corpus of Swiss court
//! decisions: query intent classification, multi-strategy retrieval with
//! Reciprocal Rank Fusion, legal-domain relevance signals, and snippet
//! selection. Serving is read-only; corpora are built offline through the
//! index and store write surfaces.

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod retrieval;
pub mod semantic;
pub mod store;
pub mod text;

pub use config::EngineConfig;
pub use decision::{Decision, DecisionId, DecisionKey, RankedResult, SearchResponse};
pub use engine::SearchEngine;
pub use error::{IudexError, Result};
pub use query::{QueryFilters, SearchRequest, SortOrder};

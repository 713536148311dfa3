//! Index primitives: the tantivy text index and the HNSW vector index.
//!
//! Both are low-level building blocks. Ranking never happens here; the text
//! index returns native BM25 scores, the vector index returns cosine
//! similarities, and everything above is fusion's job.

mod text_index;
mod vector_index;

pub use text_index::{TextIndex, TextIndexError};
pub use vector_index::{VectorIndex, VectorIndexError, VectorSearchResult};

//! Persistent corpus storage: the decision store and the optional citation
//! graph, both sqlite files behind r2d2 pools.

mod citations;
mod decisions;

pub use citations::CitationGraph;
pub use decisions::{DbPool, DecisionStore};

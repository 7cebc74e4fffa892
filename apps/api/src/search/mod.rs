//! Twin retrieval: image embedding, vector search and clinical re-ranking.

pub mod handlers;
pub mod qdrant;
pub mod rerank;

pub use qdrant::{CaseIndex, IndexPoint, QdrantClient, ScoredPoint, StoredPoint, VectorStoreError};

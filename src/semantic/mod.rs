//! Semantic search infrastructure for profile embeddings.
//!
//! # Architecture
//!
//! - `embeddings`: wraps fastembed for vector generation
//! - `worker`: dedicated thread owning the model, request/response channels
//! - `index`: in-memory vector index with cosine-similarity top-k ranking
//! - `storage`: binary I/O for the vectors.bin sidecar
//! - `text`: builds the canonical search string a profile is embedded under

pub mod embeddings;
mod index;
mod storage;
pub mod text;
mod worker;

pub use embeddings::{hash_model_name, EmbeddingError, EmbeddingModel};
pub use index::{IndexError, Ranked, VectorIndex};
pub use storage::{VectorStorage, VectorStorageError};
pub use worker::EmbeddingWorker;

/// Every stored and query vector has exactly this many components.
pub const EMBEDDING_DIM: usize = 384;

/// Default embedding model name (384-dim, compact, fast first load)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

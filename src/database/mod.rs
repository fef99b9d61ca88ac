// Database module
// SQLite holds the history metadata, the vector store holds the embeddings

pub mod sqlite;
pub mod vector_store;

pub use sqlite::*;
pub use vector_store::{EmbeddingRecord, SearchHit, SharedStore, VectorIndex, VectorStore};



pub mod core;
pub mod db;
pub mod llm;
pub mod toolkit;
pub mod utils;

pub use utils::{safe_truncate, safe_truncate_ellipsis};


pub use crate::core::config::{AppSettings, GragConfig};
pub use crate::core::error::{ConfigError, GragError, Result};
pub use db::{InMemoryNodeStore, JsonNodeStore, NodeRecord, NodeStore, StoreError};
pub use llm::embeddings::{EmbeddingError, EmbeddingGenerator, EmbeddingProvider};
pub use toolkit::graph_search::{
    GraphContext, GraphIndex, GragRetriever, IndexBuildError, RetrievalError, SearchManager,
    SearchResult, SearchStats,
};


pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";


pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";


pub const DEFAULT_CACHE_SIZE: usize = 1000;


pub const DEFAULT_CACHE_TTL: u64 = 300;


pub const DEFAULT_QUERY_CHUNK_CHARS: usize = 8000;

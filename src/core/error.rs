

use thiserror::Error;

use crate::llm::embeddings::EmbeddingError;
use crate::toolkit::graph_search::{IndexBuildError, RetrievalError};


#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid URL for `{field}`: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("Unknown embedding backend: {0}. Supported: ollama, openai")]
    UnknownBackend(String),

    #[error("Failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}


#[derive(Error, Debug)]
pub enum GragError {
    #[error("Index build error: {0}")]
    IndexBuild(#[from] IndexBuildError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GragError {
    pub fn is_index_build(&self) -> bool {
        matches!(self, Self::IndexBuild(_))
    }
}


pub type Result<T> = std::result::Result<T, GragError>;

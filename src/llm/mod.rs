

pub mod embeddings;
pub mod factory;

pub use embeddings::{
    EmbeddingBackend, EmbeddingBackendKind, EmbeddingError, EmbeddingGenerator, EmbeddingProvider,
    average_embeddings,
};
pub use factory::EmbeddingProviderFactory;

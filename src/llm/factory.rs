

use std::sync::Arc;

use url::Url;

use super::embeddings::{EmbeddingBackend, EmbeddingBackendKind, EmbeddingGenerator, EmbeddingProvider};
use crate::core::config::AppSettings;
use crate::core::error::{ConfigError, Result};


pub struct EmbeddingProviderFactory;

impl EmbeddingProviderFactory {

    pub fn backend_from_settings(settings: &AppSettings) -> std::result::Result<EmbeddingBackend, ConfigError> {
        let kind: EmbeddingBackendKind = settings
            .embedding_backend
            .parse()
            .map_err(|_| ConfigError::UnknownBackend(settings.embedding_backend.clone()))?;

        let base_url = Url::parse(&settings.embedding_url).map_err(|source| ConfigError::InvalidUrl {
            field: "embedding_url",
            source,
        })?;

        match kind {
            EmbeddingBackendKind::Ollama => Ok(EmbeddingBackend::Ollama { base_url }),
            EmbeddingBackendKind::OpenAi => {
                let api_key = settings
                    .embedding_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        ConfigError::invalid("embedding_api_key", "required for the openai backend")
                    })?;
                Ok(EmbeddingBackend::OpenAi { base_url, api_key })
            }
        }
    }


    pub fn from_settings(settings: &AppSettings) -> Result<EmbeddingGenerator> {
        let backend = Self::backend_from_settings(settings)?;
        let generator = EmbeddingGenerator::new(
            backend,
            settings.embedding_model.clone(),
            settings.http_timeout_secs,
            settings.embedding_cache_size,
            settings.embedding_cache_ttl_secs,
            settings.query_chunk_chars,
        )?;
        Ok(generator)
    }


    pub fn shared_from_settings(settings: &AppSettings) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(Self::from_settings(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GragError;

    #[test]
    fn test_ollama_from_defaults() {
        let settings = AppSettings::default();
        let generator = EmbeddingProviderFactory::from_settings(&settings).unwrap();
        assert_eq!(generator.backend().kind(), EmbeddingBackendKind::Ollama);
        assert_eq!(generator.model_name(), crate::DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_openai_requires_key() {
        let settings = AppSettings {
            embedding_backend: "openai".to_string(),
            embedding_url: "https://api.openai.com/v1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EmbeddingProviderFactory::from_settings(&settings),
            Err(GragError::Config(ConfigError::InvalidField { field: "embedding_api_key", .. }))
        ));

        let settings = AppSettings {
            embedding_api_key: Some("sk-test".to_string()),
            ..settings
        };
        let generator = EmbeddingProviderFactory::from_settings(&settings).unwrap();
        assert_eq!(generator.backend().kind(), EmbeddingBackendKind::OpenAi);
    }

    #[test]
    fn test_unknown_backend() {
        let settings = AppSettings {
            embedding_backend: "word2vec".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EmbeddingProviderFactory::backend_from_settings(&settings),
            Err(ConfigError::UnknownBackend(name)) if name == "word2vec"
        ));
    }
}

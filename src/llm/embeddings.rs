

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{EnumString, IntoStaticStr};
use text_splitter::{Characters, TextSplitter};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;


#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty text")]
    EmptyText,

    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Provider(String),
}


/// Turns text into a fixed-length vector.
///
/// Implementations must return vectors of the same length for every call on
/// one instance. Retrying is the implementation's business, not the caller's.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model_name(&self) -> &str;
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EmbeddingBackendKind {
    Ollama,
    #[strum(to_string = "openai", serialize = "openai_compat")]
    OpenAi,
}


#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Ollama { base_url: Url },
    OpenAi { base_url: Url, api_key: String },
}

impl EmbeddingBackend {
    pub fn kind(&self) -> EmbeddingBackendKind {
        match self {
            Self::Ollama { .. } => EmbeddingBackendKind::Ollama,
            Self::OpenAi { .. } => EmbeddingBackendKind::OpenAi,
        }
    }
}


#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}


#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}


struct QueryEmbeddingCache {
    entries: Mutex<LruCache<String, (Vec<f32>, Instant)>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryEmbeddingCache {
    fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock();
        let lookup = entries
            .get(key)
            .map(|(embedding, created_at)| (created_at.elapsed() < self.ttl).then(|| embedding.clone()));

        let fresh = match lookup {
            Some(Some(embedding)) => Some(embedding),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        };

        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    fn put(&self, key: String, embedding: Vec<f32>) {
        self.entries.lock().put(key, (embedding, Instant::now()));
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.lock().len(),
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}


/// HTTP embedding client for one backend and model.
///
/// Texts longer than `chunk_chars` characters are split and the chunk
/// embeddings averaged. Per-chunk results are cached for `cache_ttl`.
pub struct EmbeddingGenerator {
    backend: EmbeddingBackend,
    model: String,
    client: Client,
    cache: Option<QueryEmbeddingCache>,
    splitter: TextSplitter<Characters>,
    chunk_chars: usize,
}

impl EmbeddingGenerator {
    pub fn new(
        backend: EmbeddingBackend,
        model: impl Into<String>,
        timeout_secs: u64,
        cache_size: usize,
        cache_ttl_secs: u64,
        chunk_chars: usize,
    ) -> Result<Self, EmbeddingError> {
        let model = model.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let cache = NonZeroUsize::new(cache_size)
            .map(|capacity| QueryEmbeddingCache::new(capacity, Duration::from_secs(cache_ttl_secs)));

        let chunk_chars = chunk_chars.max(1);

        info!(
            "EmbeddingGenerator initialized: backend={}, model={}, cache={}",
            <&'static str>::from(backend.kind()),
            model,
            cache_size
        );

        Ok(Self {
            backend,
            model,
            client,
            cache,
            splitter: TextSplitter::new(chunk_chars),
            chunk_chars,
        })
    }

    pub async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let chunks = self.split_text(text);
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            embeddings.push(self.embed_chunk(chunk).await?);
        }

        if chunks.len() > 1 {
            debug!("Averaging {} chunk embeddings for query", chunks.len());
        }
        average_embeddings(&embeddings)
    }

    fn split_text(&self, text: &str) -> Vec<String> {
        if text.chars().count() <= self.chunk_chars {
            return vec![text.to_string()];
        }

        self.splitter.chunks(text).map(|s| s.to_string()).collect()
    }

    async fn embed_chunk(&self, chunk: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = QueryEmbeddingCache::key(&self.model, chunk);

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                debug!("Cache HIT for: {}...", crate::safe_truncate(chunk, 50));
                return Ok(cached);
            }
        }

        let embedding = match &self.backend {
            EmbeddingBackend::Ollama { base_url } => self.request_ollama(base_url, chunk).await?,
            EmbeddingBackend::OpenAi { base_url, api_key } => {
                self.request_openai(base_url, api_key, chunk).await?
            }
        };

        if embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty embedding vector".to_string()));
        }

        if let Some(cache) = &self.cache {
            cache.put(key, embedding.clone());
        }
        Ok(embedding)
    }

    async fn request_ollama(&self, base_url: &Url, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", base_url.as_str().trim_end_matches('/')))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaEmbeddingResponse>()
            .await?;

        Ok(response.embedding)
    }

    async fn request_openai(
        &self,
        base_url: &Url,
        api_key: &str,
        text: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let request = OpenAIEmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", base_url.as_str().trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIEmbeddingResponse>()
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding in response".to_string()))
    }

    pub fn backend(&self) -> &EmbeddingBackend {
        &self.backend
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.as_ref().map(QueryEmbeddingCache::stats).unwrap_or_default()
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Embedding cache cleared");
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.generate(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}


pub fn average_embeddings(embeddings: &[Vec<f32>]) -> Result<Vec<f32>, EmbeddingError> {
    let Some(first) = embeddings.first() else {
        return Err(EmbeddingError::InvalidResponse("no embeddings to average".to_string()));
    };
    if embeddings.len() == 1 {
        return Ok(first.clone());
    }

    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    for embedding in embeddings {
        if embedding.len() != dim {
            return Err(EmbeddingError::InvalidResponse(format!(
                "chunk embeddings disagree on dimension: {} vs {}",
                dim,
                embedding.len()
            )));
        }
        for (acc, value) in sum.iter_mut().zip(embedding) {
            *acc += value;
        }
    }

    let count = embeddings.len() as f32;
    Ok(sum.into_iter().map(|v| v / count).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(cache_size: usize, chunk_chars: usize) -> EmbeddingGenerator {
        // Discard port: any request that gets past the cache fails.
        let backend = EmbeddingBackend::Ollama {
            base_url: Url::parse("http://127.0.0.1:9").unwrap(),
        };
        EmbeddingGenerator::new(backend, "nomic-embed-text", 1, cache_size, 60, chunk_chars).unwrap()
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("ollama".parse::<EmbeddingBackendKind>().unwrap(), EmbeddingBackendKind::Ollama);
        assert_eq!("OpenAI".parse::<EmbeddingBackendKind>().unwrap(), EmbeddingBackendKind::OpenAi);
        assert_eq!("openai_compat".parse::<EmbeddingBackendKind>().unwrap(), EmbeddingBackendKind::OpenAi);
        assert!("jina".parse::<EmbeddingBackendKind>().is_err());
    }

    #[test]
    fn test_average_embeddings() {
        let avg = average_embeddings(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(avg, vec![0.5, 0.5]);

        assert!(average_embeddings(&[]).is_err());
        assert!(average_embeddings(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let generator = generator(10, 100);
        assert!(matches!(generator.generate("   ").await, Err(EmbeddingError::EmptyText)));
    }

    #[tokio::test]
    async fn test_cached_chunk_skips_backend() {
        let generator = generator(10, 100);
        let key = QueryEmbeddingCache::key("nomic-embed-text", "tumour staging");
        generator.cache.as_ref().unwrap().put(key, vec![0.25, 0.75]);

        let embedding = generator.embed("  tumour staging ").await.unwrap();
        assert_eq!(embedding, vec![0.25, 0.75]);

        let stats = generator.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = QueryEmbeddingCache::new(NonZeroUsize::new(2).unwrap(), Duration::ZERO);
        cache.put("k".to_string(), vec![1.0]);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_cache_key_depends_on_model() {
        assert_ne!(
            QueryEmbeddingCache::key("a", "text"),
            QueryEmbeddingCache::key("b", "text")
        );
    }

    #[test]
    fn test_split_long_text() {
        let generator = generator(0, 40);
        let text = "First sentence here. Second sentence follows. Third one closes it out.";

        let chunks = generator.split_text(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40);
        }

        assert_eq!(generator.split_text("short"), vec!["short".to_string()]);
    }
}

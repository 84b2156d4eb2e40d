#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use grag::db::{InMemoryNodeStore, NodeRecord, NodeStore, StoreError};
use grag::llm::{EmbeddingError, EmbeddingProvider};
use grag::{GragConfig, GragRetriever};


pub fn node(id: &str, embedding: &[f32]) -> NodeRecord {
    NodeRecord::new(id, format!("{id} text")).with_embedding(embedding.to_vec())
}


pub struct StaticEmbedder {
    table: HashMap<String, Vec<f32>>,
    delay: Duration,
}

impl StaticEmbedder {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with(mut self, text: &str, embedding: &[f32]) -> Self {
        self.table.insert(text.to_string(), embedding.to_vec());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Provider(format!("unknown query {text:?}")))
    }

    fn model_name(&self) -> &str {
        "static-test"
    }
}


/// In-memory store that counts reads and can be slowed down at runtime.
pub struct CountingStore {
    inner: InMemoryNodeStore,
    reads: AtomicUsize,
    delay_ms: AtomicU64,
}

impl CountingStore {
    pub fn new(records: Vec<NodeRecord>) -> Self {
        Self {
            inner: InMemoryNodeStore::new(records),
            reads: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn replace_all(&self, records: Vec<NodeRecord>) {
        self.inner.replace_all(records);
    }
}

#[async_trait]
impl NodeStore for CountingStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.list_nodes().await
    }

    fn name(&self) -> &str {
        "counting"
    }
}


pub struct FailingStore;

#[async_trait]
impl NodeStore for FailingStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}


pub fn retriever_over(
    store: Arc<dyn NodeStore>,
    embedder: StaticEmbedder,
    config: GragConfig,
) -> GragRetriever {
    GragRetriever::new(store, Arc::new(embedder), config).unwrap()
}



use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;

use crate::db::NodeRecord;
use crate::llm::embeddings::{EmbeddingError, EmbeddingProvider};

use super::index::GraphSnapshot;


pub fn node(id: &str, embedding: &[f32]) -> NodeRecord {
    NodeRecord::new(id, id.to_uppercase()).with_embedding(embedding.to_vec())
}

pub fn snapshot_of(records: Vec<NodeRecord>) -> GraphSnapshot {
    GraphSnapshot::build(records, 1, Utc::now()).unwrap()
}


/// Answers queries from a fixed text-to-vector table.
#[derive(Default)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, embedding: &[f32]) -> Self {
        self.table.insert(text.to_string(), embedding.to_vec());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Provider(format!("no embedding for {text:?}")))
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

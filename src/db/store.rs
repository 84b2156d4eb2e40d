

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::models::NodeRecord;


#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed document: {0}")]
    Malformed(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}


#[async_trait]
pub trait NodeStore: Send + Sync {

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError>;


    fn name(&self) -> &str;
}


#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    records: RwLock<Vec<NodeRecord>>,
}

impl InMemoryNodeStore {
    pub fn new(records: Vec<NodeRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn replace_all(&self, records: Vec<NodeRecord>) {
        let mut guard = self.records.write();
        *guard = records;
        debug!("In-memory store replaced with {} records", guard.len());
    }

    pub fn upsert(&self, record: NodeRecord) {
        let mut guard = self.records.write();
        match guard.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => guard.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        Ok(self.records.read().clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

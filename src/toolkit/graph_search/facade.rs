

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::core::config::GragConfig;
use crate::core::error::{ConfigError, Result};
use crate::db::NodeStore;
use crate::llm::embeddings::EmbeddingProvider;
use crate::utils::safe_truncate_ellipsis;

use super::models::SearchResult;
use super::retriever::{DEFAULT_THRESHOLD, GragRetriever};


pub const RECOMMENDED_TOP_K: usize = 10;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total_nodes: usize,
    pub indexed_nodes: usize,
    pub nodes_without_embeddings: usize,
    pub edges: usize,
    pub embedding_dim: usize,
    pub embedding_model: String,
    pub last_build_time: DateTime<Utc>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfigInfo {
    pub model_name: String,
    pub recommended_top_k: usize,
    pub recommended_threshold: f64,
    pub supports_batch: bool,
    pub similarity_metric: String,
}


/// Search surface in the shape older callers expect, backed by [`GragRetriever`].
pub struct SearchManager {
    retriever: GragRetriever,
}

impl SearchManager {
    pub fn new(
        store: Arc<dyn NodeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: GragConfig,
        auto_refresh: bool,
    ) -> std::result::Result<Self, ConfigError> {
        let retriever = GragRetriever::new(store, embedder, config)?.with_auto_refresh(auto_refresh);
        info!("Search manager ready (model={}, auto_refresh={})", retriever.model_name(), auto_refresh);
        Ok(Self { retriever })
    }

    pub fn from_retriever(retriever: GragRetriever) -> Self {
        Self { retriever }
    }

    pub fn retriever(&self) -> &GragRetriever {
        &self.retriever
    }

    pub async fn search(&self, query: &str, top_k: usize, threshold: f64) -> Result<Vec<SearchResult>> {
        self.retriever.search(query, top_k, threshold).await.inspect_err(|e| {
            error!("Search for '{}' failed: {}", safe_truncate_ellipsis(query, 60), e);
        })
    }

    pub async fn cosine_search(&self, query: &str, top_k: usize, threshold: f64) -> Result<Vec<SearchResult>> {
        self.search(query, top_k, threshold).await
    }

    pub async fn search_by_content(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.search(query, top_k, DEFAULT_THRESHOLD).await
    }

    /// Runs the queries one after another. A failing query maps to an empty
    /// list instead of failing the batch.
    pub async fn batch_search<S: AsRef<str>>(
        &self,
        queries: &[S],
        top_k: usize,
        threshold: f64,
    ) -> HashMap<String, Vec<SearchResult>> {
        let mut answered = HashMap::with_capacity(queries.len());
        for query in queries {
            let query = query.as_ref();
            let results = self.search(query, top_k, threshold).await.unwrap_or_default();
            answered.insert(query.to_string(), results);
        }
        info!("Batch search completed for {} queries", answered.len());
        answered
    }

    pub async fn get_similar_nodes(
        &self,
        node_id: &str,
        top_k: usize,
        exclude_self: bool,
    ) -> Result<Vec<SearchResult>> {
        self.retriever
            .get_similar_nodes(node_id, top_k, exclude_self)
            .await
            .inspect_err(|e| error!("Similar-node lookup for {} failed: {}", node_id, e))
    }

    /// Always rebuilds from the store.
    pub async fn refresh_index(&self) -> Result<()> {
        self.retriever.refresh_index(true).await?;
        info!("Search index refreshed");
        Ok(())
    }

    pub async fn get_search_stats(&self) -> Result<ManagerStats> {
        let stats = self.retriever.get_search_stats().await?;
        Ok(ManagerStats {
            total_nodes: stats.total_nodes,
            indexed_nodes: stats.indexed_nodes,
            nodes_without_embeddings: stats.nodes_without_embeddings(),
            edges: stats.edges,
            embedding_dim: stats.embedding_dim,
            embedding_model: self.retriever.model_name().to_string(),
            last_build_time: stats.last_build_time,
        })
    }

    pub fn search_config(&self) -> SearchConfigInfo {
        SearchConfigInfo {
            model_name: self.retriever.model_name().to_string(),
            recommended_top_k: RECOMMENDED_TOP_K,
            recommended_threshold: DEFAULT_THRESHOLD,
            supports_batch: true,
            similarity_metric: "grag".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryNodeStore, NodeRecord};
    use crate::toolkit::graph_search::test_support::{TableEmbedder, node};

    fn manager(auto_refresh: bool) -> (Arc<InMemoryNodeStore>, SearchManager) {
        let store = Arc::new(InMemoryNodeStore::new(vec![
            node("alpha", &[1.0, 0.0]).with_links(["beta"]),
            node("beta", &[0.7, 0.7]),
            NodeRecord::new("draft", "not embedded yet"),
        ]));
        let embedder = Arc::new(TableEmbedder::new().with("x", &[1.0, 0.0]).with("y", &[0.0, 1.0]));
        let manager = SearchManager::new(store.clone(), embedder, GragConfig::default(), auto_refresh).unwrap();
        (store, manager)
    }

    #[tokio::test]
    async fn test_aliases_agree() {
        let (_, manager) = manager(true);
        let plain = manager.search("x", 5, 0.0).await.unwrap();
        assert_eq!(manager.cosine_search("x", 5, 0.0).await.unwrap(), plain);
        assert_eq!(manager.search_by_content("x", 5).await.unwrap(), plain);
        assert_eq!(plain[0].node_id, "alpha");
    }

    #[tokio::test]
    async fn test_batch_swallows_failures() {
        let (_, manager) = manager(true);
        let results = manager.batch_search(&["x", "unknown"], 2, 0.0).await;
        assert_eq!(results.len(), 2);
        assert!(!results["x"].is_empty());
        assert!(results["unknown"].is_empty());
    }

    #[tokio::test]
    async fn test_stats_report_unembedded_nodes() {
        let (_, manager) = manager(true);
        let stats = manager.get_search_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.indexed_nodes, 2);
        assert_eq!(stats.nodes_without_embeddings, 1);
        assert_eq!(stats.embedding_model, "table");
        assert_eq!(stats.edges, 1);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_store_changes() {
        let (store, manager) = manager(false);
        assert_eq!(manager.get_search_stats().await.unwrap().indexed_nodes, 2);

        store.upsert(node("draft", &[0.0, 1.0]));
        assert_eq!(manager.get_search_stats().await.unwrap().indexed_nodes, 2);

        let before = manager.get_search_stats().await.unwrap().last_build_time;
        manager.refresh_index().await.unwrap();
        let stats = manager.get_search_stats().await.unwrap();
        assert_eq!(stats.indexed_nodes, 3);
        assert!(stats.last_build_time > before);
        assert_eq!(manager.search("y", 1, 0.0).await.unwrap()[0].node_id, "draft");
    }

    #[test]
    fn test_search_config() {
        let (_, manager) = manager(true);
        let config = manager.search_config();
        assert_eq!(config.model_name, "table");
        assert_eq!(config.recommended_top_k, 10);
        assert_eq!(config.recommended_threshold, 0.0);
        assert_eq!(config.similarity_metric, "grag");
    }
}

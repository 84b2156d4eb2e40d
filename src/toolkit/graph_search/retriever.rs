

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::GragConfig;
use crate::core::error::{ConfigError, Result};
use crate::db::NodeStore;
use crate::llm::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::utils::safe_truncate_ellipsis;

use super::expansion::SubgraphExpander;
use super::index::{GraphIndex, GraphSnapshot};
use super::models::{GraphContext, SearchResult, SearchStats};
use super::scoring::{Contribution, ScoreBlender};
use super::seeds::SeedSelector;


pub const DEFAULT_TOP_K: usize = 5;

pub const DEFAULT_THRESHOLD: f64 = 0.0;

/// Similar-node lookups rank every candidate, however dissimilar.
const SIMILAR_NODES_THRESHOLD: f64 = -1.0;

const LOGGED_QUERY_CHARS: usize = 60;


#[derive(Error, Debug, PartialEq)]
pub enum RetrievalError {
    #[error("Query embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Query embedding contains non-finite values")]
    NonFiniteQuery,
}


/// Graph-aware retriever over a [`NodeStore`].
///
/// Ranks nodes by blending their own similarity to the query with the
/// similarity of the neighbourhood they were reached through:
///
/// 1. Seeds: the `seed_top_k` nodes closest to the query.
/// 2. Expansion: breadth-first out to `hops` around each seed.
/// 3. Blending: `node_weight * local + subgraph_weight * subgraph * hop_decay^hop`,
///    keeping each node's best score across seeds.
pub struct GragRetriever {
    index: GraphIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    config: GragConfig,
    auto_refresh: bool,
}

impl GragRetriever {
    pub fn new(
        store: Arc<dyn NodeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: GragConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        info!(
            "GRAG retriever over {} store: hops={}, seed_top_k={}, weights={}/{}, hop_decay={}, ttl={:?}",
            store.name(),
            config.hops,
            config.seed_top_k,
            config.node_weight,
            config.subgraph_weight,
            config.hop_decay,
            config.cache_ttl()
        );

        let index = GraphIndex::new(store, config.cache_ttl(), config.store_timeout());
        Ok(Self {
            index,
            embedder,
            config,
            auto_refresh: true,
        })
    }

    /// With auto-refresh off the index is built once, on first use, and
    /// afterwards only by [`refresh_index`](Self::refresh_index).
    pub fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    pub fn config(&self) -> &GragConfig {
        &self.config
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub async fn search(&self, query: &str, top_k: usize, threshold: f64) -> Result<Vec<SearchResult>> {
        let snapshot = self.snapshot_for_query().await?;
        self.search_in(&snapshot, query, top_k, threshold).await
    }

    /// Runs every query against one snapshot. Fails on the first error.
    pub async fn batch_search<S>(
        &self,
        queries: &[S],
        top_k: usize,
        threshold: f64,
    ) -> Result<HashMap<String, Vec<SearchResult>>>
    where
        S: AsRef<str> + Sync,
    {
        let snapshot = self.snapshot_for_query().await?;

        let searches = queries.iter().map(|query| {
            let snapshot = Arc::clone(&snapshot);
            async move {
                let query = query.as_ref();
                let results = self.search_in(&snapshot, query, top_k, threshold).await?;
                Ok::<_, crate::core::error::GragError>((query.to_string(), results))
            }
        });

        let answered = futures::future::try_join_all(searches).await?;
        Ok(answered.into_iter().collect())
    }

    /// Ranks nodes against the embedding of `node_id` itself.
    ///
    /// An id that is not indexed yields an empty list.
    pub async fn get_similar_nodes(
        &self,
        node_id: &str,
        top_k: usize,
        exclude_self: bool,
    ) -> Result<Vec<SearchResult>> {
        let snapshot = self.snapshot_for_query().await?;

        let Some(position) = snapshot.position(node_id) else {
            warn!("Node {} is not in the graph index", node_id);
            return Ok(Vec::new());
        };

        let exclude = exclude_self.then_some(position);
        Ok(self.rank(
            &snapshot,
            snapshot.raw_embedding(position),
            top_k,
            SIMILAR_NODES_THRESHOLD,
            exclude,
        ))
    }

    pub async fn refresh_index(&self, force: bool) -> Result<()> {
        self.index.ensure_fresh(force).await?;
        Ok(())
    }

    pub async fn get_search_stats(&self) -> Result<SearchStats> {
        let snapshot = self.snapshot_for_query().await?;
        Ok(snapshot.stats())
    }

    async fn snapshot_for_query(&self) -> Result<Arc<GraphSnapshot>> {
        if !self.auto_refresh {
            if let Some(snapshot) = self.index.snapshot() {
                return Ok(snapshot);
            }
        }
        Ok(self.index.ensure_fresh(false).await?)
    }

    async fn search_in(
        &self,
        snapshot: &GraphSnapshot,
        query: &str,
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();

        let vector = self.embed_query(query).await?;
        check_query_vector(&vector, snapshot.dimension())?;

        let results = self.rank(snapshot, &vector, top_k, threshold, None);
        debug!(
            "GRAG search '{}' returned {} results (top_k={}, threshold={}) in {:?}",
            safe_truncate_ellipsis(query, LOGGED_QUERY_CHARS),
            results.len(),
            top_k,
            threshold,
            started.elapsed()
        );
        Ok(results)
    }

    async fn embed_query(&self, query: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let embedding = self.embedder.embed(query);
        match self.config.embed_timeout() {
            Some(limit) => tokio::time::timeout(limit, embedding)
                .await
                .map_err(|_| EmbeddingError::Timeout(limit))?,
            None => embedding.await,
        }
    }

    fn rank(
        &self,
        snapshot: &GraphSnapshot,
        query: &[f32],
        top_k: usize,
        threshold: f64,
        exclude: Option<usize>,
    ) -> Vec<SearchResult> {
        if top_k == 0 {
            return Vec::new();
        }

        let selector = SeedSelector::new(snapshot, query);
        let seeds = selector.select(self.config.seed_top_k);
        let local = selector.similarities();
        let expander = SubgraphExpander::new(snapshot);

        let mut blender = ScoreBlender::new(snapshot, &self.config, query, local);
        for &seed in &seeds {
            let subgraph = expander.expand(seed, self.config.hops);
            let subgraph_score = blender.absorb(&subgraph);
            if self.config.debug_logging {
                debug!(
                    "Seed {} (sim={:.4}): {} nodes within {} hops, subgraph_score={:.4}",
                    snapshot.node(seed).id,
                    local[seed],
                    subgraph.len(),
                    self.config.hops,
                    subgraph_score
                );
            }
        }

        if self.config.debug_logging {
            debug!("{} seeds expanded into {} candidates", seeds.len(), blender.candidate_count());
        }

        blender
            .rank(top_k, threshold, exclude)
            .into_iter()
            .map(|(position, contribution)| self.to_result(snapshot, position, contribution))
            .collect()
    }

    fn to_result(&self, snapshot: &GraphSnapshot, position: usize, contribution: Contribution) -> SearchResult {
        let record = snapshot.node(position);
        SearchResult {
            node_id: record.id.clone(),
            score: contribution.score,
            text: record.text.clone(),
            longform_text: record.longform_text.clone(),
            notes: record.notes.clone(),
            links: record.links.clone(),
            attributes: record.attributes.clone(),
            graph_context: GraphContext {
                seed_node: snapshot.node(contribution.seed).id.clone(),
                hop_distance: contribution.hop,
                subgraph_score: contribution.subgraph_score,
                local_similarity: contribution.local_similarity,
                neighbors: snapshot.describe_neighbors(position, self.config.max_context_neighbors),
            },
        }
    }
}


fn check_query_vector(vector: &[f32], expected: usize) -> std::result::Result<(), RetrievalError> {
    if vector.len() != expected {
        return Err(RetrievalError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if !vector.iter().all(|v| v.is_finite()) {
        return Err(RetrievalError::NonFiniteQuery);
    }
    Ok(())
}

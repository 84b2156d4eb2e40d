

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{NodeRecord, NodeStore, StoreError};

use super::models::{NeighborContext, RelationKind, SearchStats};
use super::scoring::normalize;


#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("Node store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Node store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("No nodes with usable embeddings ({total} records read)")]
    NoEligibleNodes { total: usize },
}


/// Immutable view of the knowledge graph built from one store read.
///
/// Nodes are ordered by ascending id and addressed by position; every
/// per-node vector (embeddings, adjacency) shares that ordering.
#[derive(Debug)]
pub struct GraphSnapshot {
    nodes: Vec<NodeRecord>,
    positions: HashMap<String, usize>,
    unit_embeddings: Vec<f32>,
    adjacency: Vec<BTreeMap<usize, BTreeSet<RelationKind>>>,
    dimension: usize,
    edge_count: usize,
    total_records: usize,
    version: u64,
    built_at: DateTime<Utc>,
}

impl GraphSnapshot {
    pub fn build(
        records: Vec<NodeRecord>,
        version: u64,
        built_at: DateTime<Utc>,
    ) -> Result<Self, IndexBuildError> {
        let total_records = records.len();

        let mut eligible: Vec<NodeRecord> = records.into_iter().filter(NodeRecord::has_embedding).collect();
        // Stable, so duplicates stay in store order.
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        let dimension =
            majority_dimension(&eligible).ok_or(IndexBuildError::NoEligibleNodes { total: total_records })?;

        let before = eligible.len();
        eligible.retain(|record| {
            let embedding = record.embedding.as_deref().unwrap_or_default();
            if embedding.len() != dimension {
                debug!(
                    "Skipping node {}: embedding has {} dimensions, index uses {}",
                    record.id,
                    embedding.len(),
                    dimension
                );
                return false;
            }
            if !embedding.iter().all(|v| v.is_finite()) {
                debug!("Skipping node {}: embedding has non-finite components", record.id);
                return false;
            }
            true
        });
        let rejected = before - eligible.len();
        if rejected > 0 {
            warn!(
                "Skipped {} of {} embedded records with non-finite values or a dimension other than {}",
                rejected, before, dimension
            );
        }

        eligible.dedup_by(|later, earlier| {
            let duplicate = later.id == earlier.id;
            if duplicate {
                warn!("Duplicate node id {}, keeping the first usable record", later.id);
            }
            duplicate
        });

        let positions: HashMap<String, usize> = eligible
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id.clone(), pos))
            .collect();

        let mut unit_embeddings = Vec::with_capacity(eligible.len() * dimension);
        for record in &eligible {
            unit_embeddings.extend(normalize(record.embedding.as_deref().unwrap_or_default()));
        }

        let mut adjacency: Vec<BTreeMap<usize, BTreeSet<RelationKind>>> = vec![BTreeMap::new(); eligible.len()];
        for (pos, record) in eligible.iter().enumerate() {
            let relations = record
                .parent_id
                .iter()
                .chain(&record.children_ids)
                .map(|id| (id, RelationKind::Hierarchy))
                .chain(record.linked_ids.iter().map(|id| (id, RelationKind::Link)));

            for (target, kind) in relations {
                let Some(&other) = positions.get(target.as_str()) else {
                    continue;
                };
                if other == pos {
                    continue;
                }
                adjacency[pos].entry(other).or_default().insert(kind);
                adjacency[other].entry(pos).or_default().insert(kind);
            }
        }
        let edge_count = adjacency.iter().map(BTreeMap::len).sum::<usize>() / 2;

        Ok(Self {
            nodes: eligible,
            positions,
            unit_embeddings,
            adjacency,
            dimension,
            edge_count,
            total_records,
            version,
            built_at,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn node(&self, position: usize) -> &NodeRecord {
        &self.nodes[position]
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn unit_embedding(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.unit_embeddings[start..start + self.dimension]
    }

    /// The embedding as stored, before normalization.
    pub fn raw_embedding(&self, position: usize) -> &[f32] {
        self.nodes[position].embedding.as_deref().unwrap_or_default()
    }

    /// Neighbours in ascending id order.
    pub fn neighbors(&self, position: usize) -> impl Iterator<Item = (usize, &BTreeSet<RelationKind>)> {
        self.adjacency[position].iter().map(|(other, kinds)| (*other, kinds))
    }

    pub fn degree(&self, position: usize) -> usize {
        self.adjacency[position].len()
    }

    pub fn neighbor_ids(&self, id: &str) -> Option<Vec<&str>> {
        let position = self.position(id)?;
        Some(self.neighbors(position).map(|(other, _)| self.nodes[other].id.as_str()).collect())
    }

    /// Up to `limit` neighbours, best connected first (ties by id).
    pub fn describe_neighbors(&self, position: usize, limit: usize) -> Vec<NeighborContext> {
        let mut neighbors: Vec<(usize, &BTreeSet<RelationKind>)> = self.neighbors(position).collect();
        neighbors.sort_by(|(a, _), (b, _)| self.degree(*b).cmp(&self.degree(*a)).then_with(|| a.cmp(b)));

        neighbors
            .into_iter()
            .take(limit)
            .map(|(other, kinds)| NeighborContext {
                node_id: self.nodes[other].id.clone(),
                relations: kinds.iter().copied().collect(),
            })
            .collect()
    }

    pub fn is_stale(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        // A clock that moved backwards yields a negative age, which never expires.
        now.signed_duration_since(self.built_at)
            .to_std()
            .is_ok_and(|age| age > ttl)
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            total_nodes: self.total_records,
            indexed_nodes: self.nodes.len(),
            edges: self.edge_count,
            embedding_dim: self.dimension,
            last_build_time: self.built_at,
            version: self.version,
        }
    }
}


/// Most common length among finite embeddings; ties go to the length met
/// first in `records` order.
fn majority_dimension(records: &[NodeRecord]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for embedding in records.iter().filter_map(|r| r.embedding.as_deref()) {
        if embedding.is_empty() || !embedding.iter().all(|v| v.is_finite()) {
            continue;
        }
        match counts.iter_mut().find(|(len, _)| *len == embedding.len()) {
            Some((_, count)) => *count += 1,
            None => counts.push((embedding.len(), 1)),
        }
    }

    counts
        .iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(len, _)| *len)
}


/// Owns the current [`GraphSnapshot`] and rebuilds it from the store.
///
/// Readers clone the snapshot `Arc` under a short read lock and never wait
/// for a rebuild once a snapshot exists. Rebuilds are serialized, and
/// callers that queue behind a rebuild reuse its result instead of starting
/// another one.
pub struct GraphIndex {
    store: Arc<dyn NodeStore>,
    ttl: Option<Duration>,
    store_timeout: Option<Duration>,
    current: RwLock<Option<Arc<GraphSnapshot>>>,
    rebuild: tokio::sync::Mutex<()>,
}

impl GraphIndex {
    pub fn new(store: Arc<dyn NodeStore>, ttl: Option<Duration>, store_timeout: Option<Duration>) -> Self {
        Self {
            store,
            ttl,
            store_timeout,
            current: RwLock::new(None),
            rebuild: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn snapshot(&self) -> Option<Arc<GraphSnapshot>> {
        self.current.read().clone()
    }

    /// False until a first build has succeeded.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.snapshot().is_some_and(|s| s.is_stale(self.ttl, now))
    }

    /// Unconditionally rebuilds from the store.
    pub async fn build(&self) -> Result<Arc<GraphSnapshot>, IndexBuildError> {
        let _guard = self.rebuild.lock().await;
        self.rebuild_locked().await
    }

    /// Returns a snapshot no older than the TTL, rebuilding if needed.
    ///
    /// A stale snapshot is rebuilt by whichever caller claims the rebuild
    /// first; everyone else keeps reading the stale snapshot until the new
    /// one is installed. Only a cold index or `force` waits for a rebuild in
    /// flight, and `force` reuses a rebuild that finished while it waited.
    pub async fn ensure_fresh(&self, force: bool) -> Result<Arc<GraphSnapshot>, IndexBuildError> {
        let observed = self.snapshot();
        let observed_version = observed.as_ref().map_or(0, |s| s.version());

        let _guard = match (&observed, force) {
            (Some(snapshot), false) => {
                if !snapshot.is_stale(self.ttl, Utc::now()) {
                    return Ok(Arc::clone(snapshot));
                }
                match self.rebuild.try_lock() {
                    Ok(guard) => guard,
                    Err(_) => {
                        debug!("Graph index v{} is stale, serving it while a rebuild runs", snapshot.version());
                        return Ok(Arc::clone(snapshot));
                    }
                }
            }
            _ => self.rebuild.lock().await,
        };

        if let Some(current) = self.snapshot() {
            if current.version() > observed_version {
                debug!("Reusing graph index v{} built by a concurrent caller", current.version());
                return Ok(current);
            }
        }

        self.rebuild_locked().await
    }

    pub fn stats(&self) -> Option<SearchStats> {
        self.snapshot().map(|s| s.stats())
    }

    async fn rebuild_locked(&self) -> Result<Arc<GraphSnapshot>, IndexBuildError> {
        let started = Instant::now();
        let previous = self.snapshot();

        let fetch = self.store.list_nodes();
        let records = match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                warn!("Node store {} timed out after {:?}", self.store.name(), limit);
                IndexBuildError::Timeout(limit)
            })?,
            None => fetch.await,
        }?;

        let version = previous.as_ref().map_or(0, |s| s.version()) + 1;
        let now = Utc::now();
        let built_at = match &previous {
            Some(prev) if now <= prev.built_at() => prev.built_at() + TimeDelta::microseconds(1),
            _ => now,
        };

        let snapshot = Arc::new(GraphSnapshot::build(records, version, built_at)?);
        *self.current.write() = Some(Arc::clone(&snapshot));

        info!(
            "Graph index v{} built from {}: {} nodes ({} without embeddings), {} edges, dim={} in {:?}",
            snapshot.version(),
            self.store.name(),
            snapshot.len(),
            snapshot.total_records() - snapshot.len(),
            snapshot.edge_count(),
            snapshot.dimension(),
            started.elapsed()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryNodeStore;
    use crate::toolkit::graph_search::test_support::{node, snapshot_of};

    #[test]
    fn test_snapshot_orders_nodes_by_id() {
        let snapshot = snapshot_of(vec![
            node("c", &[0.0, 1.0]),
            node("a", &[1.0, 0.0]),
            node("b", &[1.0, 1.0]),
        ]);
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(snapshot.position("b"), Some(1));
        assert_eq!(snapshot.dimension(), 2);

        let unit = snapshot.unit_embedding(1);
        assert!((unit[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(snapshot.raw_embedding(1), &[1.0, 1.0]);
    }

    #[test]
    fn test_edges_are_symmetric_and_deduplicated() {
        let snapshot = snapshot_of(vec![
            node("root", &[1.0, 0.0]).with_children(["a", "b", "ghost"]),
            node("a", &[0.0, 1.0]).with_parent("root").with_links(["b", "a"]),
            node("b", &[1.0, 1.0]).with_links(["a"]),
        ]);

        assert_eq!(snapshot.edge_count(), 3);
        assert_eq!(snapshot.neighbor_ids("root").unwrap(), vec!["a", "b"]);
        assert_eq!(snapshot.neighbor_ids("a").unwrap(), vec!["b", "root"]);
        assert_eq!(snapshot.neighbor_ids("b").unwrap(), vec!["a", "root"]);

        let a = snapshot.position("a").unwrap();
        let root = snapshot.position("root").unwrap();
        let kinds: Vec<_> = snapshot.neighbors(a).find(|(p, _)| *p == root).unwrap().1.iter().copied().collect();
        assert_eq!(kinds, vec![RelationKind::Hierarchy]);
    }

    #[test]
    fn test_relations_to_unindexed_nodes_are_dropped() {
        let snapshot = snapshot_of(vec![
            node("a", &[1.0, 0.0]).with_links(["b"]),
            NodeRecord::new("b", "no embedding").with_links(["a"]),
        ]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.total_records(), 2);
        assert_eq!(snapshot.edge_count(), 0);
    }

    #[test]
    fn test_mismatched_and_non_finite_embeddings_skipped() {
        let snapshot = snapshot_of(vec![
            node("a", &[1.0, 0.0]),
            node("b", &[1.0, 0.0, 0.0]),
            node("c", &[f32::NAN, 0.0]),
            node("d", &[0.0, 1.0]),
        ]);
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["a", "d"]);
        assert_eq!(snapshot.stats().nodes_without_embeddings(), 2);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let snapshot = snapshot_of(vec![
            node("a", &[1.0, 0.0]).with_links(["b"]),
            node("a", &[0.0, 1.0]),
            node("b", &[0.0, 1.0]),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.raw_embedding(0), &[1.0, 0.0]);
        assert_eq!(snapshot.edge_count(), 1);
    }

    #[test]
    fn test_stray_dimension_on_lowest_id_does_not_set_index_dimension() {
        let snapshot = snapshot_of(vec![
            node("a", &[1.0, 0.0, 0.0]),
            node("b", &[1.0, 0.0]),
            node("c", &[0.0, 1.0]),
            node("d", &[1.0, 1.0]),
        ]);
        assert_eq!(snapshot.dimension(), 2);
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_dimension_tie_goes_to_lowest_id() {
        let snapshot = snapshot_of(vec![node("b", &[1.0, 0.0]), node("a", &[1.0, 0.0, 0.0])]);
        assert_eq!(snapshot.dimension(), 3);
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_duplicate_with_unusable_first_copy_keeps_later_copy() {
        let snapshot = snapshot_of(vec![
            node("a", &[f32::NAN, 0.0]),
            node("a", &[1.0, 0.0, 0.0]),
            node("a", &[0.0, 1.0]).with_links(["b"]),
            node("b", &[1.0, 0.0]),
        ]);
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(snapshot.raw_embedding(0), &[0.0, 1.0]);
        assert_eq!(snapshot.edge_count(), 1);
    }

    #[test]
    fn test_no_eligible_nodes() {
        let result = GraphSnapshot::build(vec![NodeRecord::new("a", "A")], 1, Utc::now());
        assert!(matches!(result, Err(IndexBuildError::NoEligibleNodes { total: 1 })));
    }

    #[test]
    fn test_describe_neighbors_prefers_hubs() {
        let snapshot = snapshot_of(vec![
            node("hub", &[1.0, 0.0]).with_links(["x", "y", "z"]),
            node("x", &[1.0, 0.0]),
            node("y", &[1.0, 0.0]).with_links(["z"]),
            node("z", &[1.0, 0.0]),
        ]);
        let context = snapshot.describe_neighbors(snapshot.position("x").unwrap(), 6);
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].node_id, "hub");

        let context = snapshot.describe_neighbors(snapshot.position("hub").unwrap(), 2);
        let ids: Vec<&str> = context.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);
        assert_eq!(context[0].relations, vec![RelationKind::Link]);
    }

    #[test]
    fn test_snapshot_staleness() {
        let snapshot = snapshot_of(vec![node("a", &[1.0])]);
        let built = snapshot.built_at();
        assert!(!snapshot.is_stale(None, built + TimeDelta::days(365)));
        assert!(!snapshot.is_stale(Some(Duration::from_secs(60)), built + TimeDelta::seconds(30)));
        assert!(snapshot.is_stale(Some(Duration::from_secs(60)), built + TimeDelta::seconds(61)));
        assert!(!snapshot.is_stale(Some(Duration::from_secs(60)), built - TimeDelta::seconds(600)));
    }

    #[tokio::test]
    async fn test_index_builds_lazily_and_versions_increase() {
        let store = Arc::new(InMemoryNodeStore::new(vec![node("a", &[1.0, 0.0])]));
        let index = GraphIndex::new(store.clone(), None, None);
        assert!(index.snapshot().is_none());
        assert!(!index.is_stale(Utc::now()));
        assert!(index.stats().is_none());

        let first = index.ensure_fresh(false).await.unwrap();
        assert_eq!(first.version(), 1);

        let again = index.ensure_fresh(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        store.upsert(node("b", &[0.0, 1.0]));
        let forced = index.ensure_fresh(true).await.unwrap();
        assert_eq!(forced.version(), 2);
        assert_eq!(forced.len(), 2);
        assert!(forced.built_at() > first.built_at());
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_while_rebuild_in_flight() {
        let store = Arc::new(InMemoryNodeStore::new(vec![node("a", &[1.0, 0.0])]));
        let index = GraphIndex::new(store.clone(), Some(Duration::from_millis(1)), None);
        let first = index.build().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(index.is_stale(Utc::now()));

        let in_flight = index.rebuild.lock().await;
        let served = index.ensure_fresh(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &served));
        drop(in_flight);

        let rebuilt = index.ensure_fresh(false).await.unwrap();
        assert_eq!(rebuilt.version(), 2);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let store = Arc::new(InMemoryNodeStore::new(vec![node("a", &[1.0, 0.0])]));
        let index = GraphIndex::new(store.clone(), None, None);
        let first = index.build().await.unwrap();

        store.replace_all(vec![NodeRecord::new("a", "lost its embedding")]);
        assert!(matches!(
            index.build().await,
            Err(IndexBuildError::NoEligibleNodes { total: 1 })
        ));

        let current = index.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }
}

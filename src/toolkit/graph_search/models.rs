

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::db::Attribute;


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    /// Parent/child edge of the mind-map tree.
    Hierarchy,
    /// Manual cross-link between branches.
    Link,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborContext {
    pub node_id: String,
    pub relations: Vec<RelationKind>,
}


/// Why a node was returned: the seed whose neighbourhood gave it its best
/// score, how far it sits from that seed, and both similarity terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub seed_node: String,
    pub hop_distance: usize,
    pub subgraph_score: f64,
    pub local_similarity: f64,
    pub neighbors: Vec<NeighborContext>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub node_id: String,
    pub score: f64,
    pub text: String,
    pub longform_text: String,
    pub notes: String,
    pub links: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub graph_context: GraphContext,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_nodes: usize,
    pub indexed_nodes: usize,
    pub edges: usize,
    pub embedding_dim: usize,
    pub last_build_time: DateTime<Utc>,
    pub version: u64,
}

impl SearchStats {
    pub fn nodes_without_embeddings(&self) -> usize {
        self.total_nodes.saturating_sub(self.indexed_nodes)
    }
}

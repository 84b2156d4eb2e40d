

pub mod expansion;
pub mod facade;
pub mod index;
pub mod models;
pub mod retriever;
pub mod scoring;
pub mod seeds;

#[cfg(test)]
pub(crate) mod test_support;


pub use expansion::{Subgraph, SubgraphExpander};
pub use facade::{ManagerStats, SearchConfigInfo, SearchManager};
pub use index::{GraphIndex, GraphSnapshot, IndexBuildError};
pub use models::{GraphContext, NeighborContext, RelationKind, SearchResult, SearchStats};
pub use retriever::{DEFAULT_THRESHOLD, DEFAULT_TOP_K, GragRetriever, RetrievalError};
pub use scoring::{Contribution, ScoreBlender, cosine_similarity};
pub use seeds::SeedSelector;

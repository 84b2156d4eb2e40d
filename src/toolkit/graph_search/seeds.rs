

use super::index::GraphSnapshot;
use super::scoring::{dot, normalize};


/// Scores every indexed node against the query and picks the most similar
/// ones as expansion seeds.
pub struct SeedSelector {
    similarities: Vec<f64>,
}

impl SeedSelector {
    /// A zero-norm query scores 0.0 against everything.
    pub fn new(snapshot: &GraphSnapshot, query: &[f32]) -> Self {
        let unit = normalize(query);
        let similarities = (0..snapshot.len())
            .map(|position| dot(&unit, snapshot.unit_embedding(position)))
            .collect();
        Self { similarities }
    }

    /// Cosine similarity of the query to every indexed node, by position.
    pub fn similarities(&self) -> &[f64] {
        &self.similarities
    }

    /// Positions of the `seed_top_k` most similar nodes, best first.
    pub fn select(&self, seed_top_k: usize) -> Vec<usize> {
        top_positions(&self.similarities, seed_top_k)
    }
}


/// Positions of the `k` highest scores, best first, ties broken by position.
pub fn top_positions(scores: &[f64], k: usize) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }

    let order = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then_with(|| a.cmp(b));

    let mut positions: Vec<usize> = (0..scores.len()).collect();
    if k < positions.len() {
        positions.select_nth_unstable_by(k - 1, order);
        positions.truncate(k);
    }
    positions.sort_by(order);
    positions
}



use std::collections::HashMap;

use crate::core::config::GragConfig;

use super::expansion::Subgraph;
use super::index::GraphSnapshot;


const NORM_EPSILON: f64 = 1e-12;


pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

pub fn l2_norm(v: &[f32]) -> f64 {
    dot(v, v).sqrt()
}

/// Plain cosine similarity in [-1, 1]; 0.0 for empty, mismatched or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }

    dot(a, b) / (na * nb)
}

pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v).max(NORM_EPSILON);
    v.iter().map(|x| (f64::from(*x) / norm) as f32).collect()
}

pub fn mean_vector<'a>(rows: impl IntoIterator<Item = &'a [f32]>, dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for row in rows {
        for (acc, value) in sum.iter_mut().zip(row) {
            *acc += f64::from(*value);
        }
        count += 1;
    }

    if count == 0 {
        return vec![0.0; dim];
    }
    sum.into_iter().map(|v| (v / count as f64) as f32).collect()
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub score: f64,
    pub seed: usize,
    pub hop: usize,
    pub subgraph_score: f64,
    pub local_similarity: f64,
}


/// Merges per-seed contributions into one score per node.
///
/// A node reached from several seeds keeps its best contribution; equal
/// contributions keep the earlier (higher-ranked) seed.
pub struct ScoreBlender<'a> {
    snapshot: &'a GraphSnapshot,
    config: &'a GragConfig,
    query: &'a [f32],
    local: &'a [f64],
    best: HashMap<usize, Contribution>,
}

impl<'a> ScoreBlender<'a> {
    pub fn new(
        snapshot: &'a GraphSnapshot,
        config: &'a GragConfig,
        query: &'a [f32],
        local: &'a [f64],
    ) -> Self {
        Self {
            snapshot,
            config,
            query,
            local,
            best: HashMap::new(),
        }
    }

    /// Cosine between the query and the mean of the subgraph's unit embeddings.
    pub fn subgraph_score(&self, subgraph: &Subgraph) -> f64 {
        let rows = subgraph
            .members()
            .iter()
            .map(|&(position, _)| self.snapshot.unit_embedding(position));
        let pooled = mean_vector(rows, self.snapshot.dimension());
        cosine_similarity(self.query, &pooled)
    }

    pub fn contribution(&self, local_similarity: f64, subgraph_score: f64, hop: usize) -> f64 {
        let hop_factor = self.config.hop_decay.powi(hop as i32);
        let combined = self.config.node_weight * local_similarity
            + self.config.subgraph_weight * subgraph_score * hop_factor;
        combined.clamp(-1.0, 1.0)
    }

    /// Scores every member of `subgraph` against its seed and keeps the best
    /// contribution seen so far per node. Returns the subgraph score.
    pub fn absorb(&mut self, subgraph: &Subgraph) -> f64 {
        let subgraph_score = self.subgraph_score(subgraph);

        for &(position, hop) in subgraph.members() {
            let local_similarity = self.local[position];
            let candidate = Contribution {
                score: self.contribution(local_similarity, subgraph_score, hop),
                seed: subgraph.seed(),
                hop,
                subgraph_score,
                local_similarity,
            };

            self.best
                .entry(position)
                .and_modify(|existing| {
                    if candidate.score > existing.score {
                        *existing = candidate;
                    }
                })
                .or_insert(candidate);
        }

        subgraph_score
    }

    pub fn candidate_count(&self) -> usize {
        self.best.len()
    }

    /// Orders candidates by descending score (ascending id on ties), bounds
    /// them to the candidate pool, applies `threshold` and truncates to `top_k`.
    pub fn rank(self, top_k: usize, threshold: f64, exclude: Option<usize>) -> Vec<(usize, Contribution)> {
        let pool = self.config.candidate_pool(top_k).min(self.snapshot.len());

        let mut ranked: Vec<(usize, Contribution)> = self
            .best
            .into_iter()
            .filter(|(position, _)| Some(*position) != exclude)
            .collect();

        // Positions follow ascending node id, so comparing them breaks ties by id.
        ranked.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then_with(|| pa.cmp(pb)));
        ranked.truncate(pool);
        ranked.retain(|(_, c)| c.score >= threshold);
        ranked.truncate(top_k);
        ranked
    }
}

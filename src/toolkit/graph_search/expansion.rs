

use std::collections::{HashSet, VecDeque};

use super::index::GraphSnapshot;


/// Nodes within `hops` of a seed, in discovery order, with their distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    seed: usize,
    members: Vec<(usize, usize)>,
}

impl Subgraph {
    pub fn seed(&self) -> usize {
        self.seed
    }

    pub fn members(&self) -> &[(usize, usize)] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}


pub struct SubgraphExpander<'a> {
    snapshot: &'a GraphSnapshot,
}

impl<'a> SubgraphExpander<'a> {
    pub fn new(snapshot: &'a GraphSnapshot) -> Self {
        Self { snapshot }
    }

    /// Breadth-first walk from `seed`; every member carries its shortest
    /// hop distance. Neighbours are visited in ascending id order.
    pub fn expand(&self, seed: usize, hops: usize) -> Subgraph {
        let mut visited = HashSet::from([seed]);
        let mut members = vec![(seed, 0)];
        let mut frontier = VecDeque::from([(seed, 0usize)]);

        while let Some((position, hop)) = frontier.pop_front() {
            if hop >= hops {
                continue;
            }
            for (neighbor, _) in self.snapshot.neighbors(position) {
                if visited.insert(neighbor) {
                    members.push((neighbor, hop + 1));
                    frontier.push_back((neighbor, hop + 1));
                }
            }
        }

        Subgraph { seed, members }
    }
}

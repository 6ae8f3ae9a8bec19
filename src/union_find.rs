/// Union-Find over chain ids, for resolving join pairs transitively
use std::collections::{BTreeMap, HashMap};

use crate::record::ChainId;

#[derive(Debug, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
    /// Dense slot of each chain id seen so far
    slots: HashMap<ChainId, usize>,
    ids: Vec<ChainId>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, id: ChainId) -> usize {
        if let Some(&slot) = self.slots.get(&id) {
            return slot;
        }
        let slot = self.parent.len();
        self.parent.push(slot);
        self.rank.push(0);
        self.ids.push(id);
        self.slots.insert(id, slot);
        slot
    }

    /// Find the root slot of x with path compression
    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    /// Union the sets holding chains a and b
    pub fn union(&mut self, a: ChainId, b: ChainId) {
        let (x, y) = (self.slot(a), self.slot(b));
        let root_x = self.find(x);
        let root_y = self.find(y);

        if root_x != root_y {
            // Union by rank
            if self.rank[root_x] < self.rank[root_y] {
                self.parent[root_x] = root_y;
            } else if self.rank[root_x] > self.rank[root_y] {
                self.parent[root_y] = root_x;
            } else {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
    }

    /// All sets as groups of chain ids, each sorted, groups ordered by their smallest id
    pub fn get_sets(&mut self) -> Vec<Vec<ChainId>> {
        let mut by_root: HashMap<usize, Vec<ChainId>> = HashMap::new();
        for slot in 0..self.ids.len() {
            let root = self.find(slot);
            by_root.entry(root).or_default().push(self.ids[slot]);
        }

        let mut sets: Vec<Vec<ChainId>> = by_root.into_values().collect();
        for set in &mut sets {
            set.sort_unstable();
        }
        sets.sort_unstable_by_key(|set| set[0]);
        sets
    }

    /// Map every chain id seen to the smallest id of its set
    pub fn winners(&mut self) -> BTreeMap<ChainId, ChainId> {
        self.get_sets()
            .into_iter()
            .flat_map(|set| {
                let winner = set[0];
                set.into_iter().map(move |id| (id, winner))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_groups_take_smallest_id() {
        let mut uf = UnionFind::new();
        uf.union(9, 4);
        uf.union(4, 12);
        uf.union(30, 31);
        assert_eq!(uf.get_sets(), vec![vec![4, 9, 12], vec![30, 31]]);

        let winners = uf.winners();
        assert_eq!(winners[&12], 4);
        assert_eq!(winners[&9], 4);
        assert_eq!(winners[&31], 30);
        assert_eq!(winners[&30], 30);
    }
}

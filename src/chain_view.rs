/// Materialized view of collapsed chains with its own bin index
///
/// The view is a snapshot: it only changes when `refresh` is called, so
/// mutations of the store after a build are invisible until then.
use log::info;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::bin_index::{chain_entries, BinIndex, BinIndexEntry};
use crate::consolidate::{collapse_chain, ChainRange};
use crate::error::{Error, Result};
use crate::record::ChainId;
use crate::store::MemoryStore;

#[derive(Debug, Default)]
pub struct ChainView {
    ranges: BTreeMap<ChainId, ChainRange>,
    index: BinIndex,
}

impl ChainView {
    pub fn build(store: &MemoryStore) -> Result<Self> {
        let mut view = ChainView::default();
        view.refresh(store)?;
        Ok(view)
    }

    /// Collapse every chain of the store and swap in the new ranges and index
    /// together; on error the previous contents stay in place
    pub fn refresh(&mut self, store: &MemoryStore) -> Result<()> {
        let chains: Vec<_> = store.chains().collect();
        let ranges = chains
            .par_iter()
            .map(|(id, members)| collapse_chain(*members).map(|range| (*id, range)))
            .collect::<Result<BTreeMap<ChainId, ChainRange>>>()?;

        let entries: Vec<BinIndexEntry> = ranges
            .iter()
            .flat_map(|(id, range)| chain_entries(*id, std::slice::from_ref(range)))
            .collect();

        self.index = BinIndex::build(entries);
        self.ranges = ranges;
        info!("chain view refreshed: {} chains", self.ranges.len());
        Ok(())
    }

    /// Collapsed chains overlapping the region, in chain id order
    pub fn query(&self, seq_name: &str, start: u64, end: u64) -> Result<Vec<&ChainRange>> {
        let (min, max) = (start.min(end), start.max(end));
        let mut hits = Vec::new();
        for id in self.index.candidates(seq_name, min, max) {
            let range = self.ranges.get(&id).ok_or_else(|| {
                Error::integrity(format!("chain view entry for chain {id} has no collapsed range"))
            })?;
            if range.query.seq_name == seq_name && range.query.overlaps_span(min, max) {
                hits.push(range);
            }
        }
        Ok(hits)
    }

    pub fn get(&self, id: ChainId) -> Option<&ChainRange> {
        self.ranges.get(&id)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

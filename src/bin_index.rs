/// Hierarchical bin index for region queries
///
/// Every chain gets one entry per sequence it touches, spanning the extent of
/// its ranges on that sequence. An entry is filed under the coarsest scale at
/// which its whole span falls in one bucket, so a region query only has to
/// look at a handful of buckets per scale before the exact overlap filter.
use indexmap::IndexMap;
use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::record::{ChainId, Located};
use crate::sequence_index::SequenceIndex;

/// Bucket widths, coarsest first
pub const BIN_SCALES: [u64; 7] = [
    100_000_000,
    10_000_000,
    1_000_000,
    100_000,
    10_000,
    1_000,
    100,
];

/// Bin for spans that share no bucket at any scale (they cross a boundary of
/// the coarsest scale); scanned by every query
pub const OVERFLOW_BIN: f64 = 0.0;

const BUCKET_DIVISOR: f64 = 1e10;

/// Encode a (scale, bucket) pair as a single comparable number
pub fn encode_bin(scale: u64, bucket: u64) -> f64 {
    scale as f64 + bucket as f64 / BUCKET_DIVISOR
}

/// Bin holding `pos` at `scale`
pub fn bin_of(pos: u64, scale: u64) -> f64 {
    encode_bin(scale, pos / scale)
}

/// `(scale, bucket)` of the span `[min, max]`: the coarsest scale where both
/// ends share a bucket, `None` for the overflow bin
pub fn bin_key(min: u64, max: u64) -> Option<(u64, u64)> {
    let (lo, hi) = (min.min(max), min.max(max));
    BIN_SCALES
        .iter()
        .find(|&&scale| lo / scale == hi / scale)
        .map(|&scale| (scale, lo / scale))
}

/// Bin id of the span `[min, max]`
pub fn bin_id(min: u64, max: u64) -> f64 {
    bin_key(min, max).map_or(OVERFLOW_BIN, |(scale, bucket)| encode_bin(scale, bucket))
}

/// Exact partition key; near the coarsest scale the float encoding no longer
/// separates neighbouring buckets, so partitions are keyed by the pair itself
type BinKey = (u64, u64);

const OVERFLOW_KEY: BinKey = (0, 0);

fn key_of(entry: &BinIndexEntry) -> BinKey {
    bin_key(entry.min, entry.max).unwrap_or(OVERFLOW_KEY)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinIndexEntry {
    pub chain_id: ChainId,
    pub bin: f64,
    pub seq_name: String,
    pub min: u64,
    pub max: u64,
    pub is_direct: bool,
}

impl BinIndexEntry {
    pub fn new(chain_id: ChainId, seq_name: &str, min: u64, max: u64, is_direct: bool) -> Self {
        BinIndexEntry {
            chain_id,
            bin: bin_id(min, max),
            seq_name: seq_name.to_string(),
            min,
            max,
            is_direct,
        }
    }

    fn overlaps(&self, min: u64, max: u64) -> bool {
        self.min <= max && self.max >= min
    }
}

/// Entries for one chain: one per sequence name, spanning the members' query extent.
/// The strand flag comes from the first member seen on that sequence.
pub fn chain_entries<T: Located>(chain_id: ChainId, members: &[T]) -> Vec<BinIndexEntry> {
    let mut spans: IndexMap<&str, (u64, u64, bool)> = IndexMap::new();
    for member in members {
        let q = member.query();
        spans
            .entry(q.seq_name.as_str())
            .and_modify(|span| {
                span.0 = span.0.min(q.min());
                span.1 = span.1.max(q.max());
            })
            .or_insert((q.min(), q.max(), q.is_direct()));
    }

    spans
        .into_iter()
        .map(|(name, (min, max, direct))| BinIndexEntry::new(chain_id, name, min, max, direct))
        .collect()
}

type Partition = BTreeMap<BinKey, Vec<BinIndexEntry>>;

/// Bin index partitioned by sequence name
#[derive(Debug, Clone, Default)]
pub struct BinIndex {
    names: SequenceIndex,
    /// One partition per interned sequence id
    partitions: Vec<Partition>,
    /// Where each chain's entries live, as (sequence id, bin)
    locations: HashMap<ChainId, Vec<(u32, BinKey)>>,
    len: usize,
}

impl BinIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a complete index from precomputed entries
    pub fn build<I: IntoIterator<Item = BinIndexEntry>>(entries: I) -> Self {
        let mut index = BinIndex::new();
        for entry in entries {
            index.insert(entry);
        }
        debug!(
            "built bin index: {} entries, {} chains, {} sequences",
            index.len,
            index.locations.len(),
            index.names.len()
        );
        index
    }

    pub fn insert(&mut self, entry: BinIndexEntry) {
        let seq_id = self.names.get_or_insert(&entry.seq_name);
        if self.partitions.len() <= seq_id as usize {
            self.partitions.resize_with(seq_id as usize + 1, BTreeMap::new);
        }

        let key = key_of(&entry);
        self.locations
            .entry(entry.chain_id)
            .or_default()
            .push((seq_id, key));
        self.partitions[seq_id as usize]
            .entry(key)
            .or_default()
            .push(entry);
        self.len += 1;
    }

    /// Drop every entry of a chain, returning what was removed
    pub fn remove_chain(&mut self, chain_id: ChainId) -> Vec<BinIndexEntry> {
        let Some(mut locations) = self.locations.remove(&chain_id) else {
            return Vec::new();
        };
        locations.sort_unstable();
        locations.dedup();

        let mut removed = Vec::new();
        for (seq_id, key) in locations {
            let partition = &mut self.partitions[seq_id as usize];
            if let Some(bucket) = partition.get_mut(&key) {
                let (gone, kept): (Vec<_>, Vec<_>) =
                    bucket.drain(..).partition(|e| e.chain_id == chain_id);
                *bucket = kept;
                if bucket.is_empty() {
                    partition.remove(&key);
                }
                removed.extend(gone);
            }
        }
        self.len -= removed.len();
        removed
    }

    /// Swap a chain's entries for a freshly computed set
    pub fn replace_chain(&mut self, chain_id: ChainId, entries: Vec<BinIndexEntry>) {
        self.remove_chain(chain_id);
        for entry in entries {
            debug_assert_eq!(entry.chain_id, chain_id);
            self.insert(entry);
        }
    }

    pub fn contains_chain(&self, chain_id: ChainId) -> bool {
        self.locations.contains_key(&chain_id)
    }

    pub fn entries_for_chain(&self, chain_id: ChainId) -> Vec<&BinIndexEntry> {
        let Some(locations) = self.locations.get(&chain_id) else {
            return Vec::new();
        };
        let mut seen = locations.clone();
        seen.sort_unstable();
        seen.dedup();

        seen.into_iter()
            .filter_map(|(seq_id, key)| self.partitions[seq_id as usize].get(&key))
            .flat_map(|bucket| bucket.iter().filter(move |e| e.chain_id == chain_id))
            .collect()
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.locations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chain ids whose entries overlap `[start, end]` on `seq_name`, sorted and deduplicated.
    ///
    /// Start and end may come in either order.
    pub fn candidates(&self, seq_name: &str, start: u64, end: u64) -> Vec<ChainId> {
        let Some(seq_id) = self.names.get_id(seq_name) else {
            return Vec::new();
        };
        let Some(partition) = self.partitions.get(seq_id as usize) else {
            return Vec::new();
        };
        let (qmin, qmax) = (start.min(end), start.max(end));

        let mut hits = Vec::new();
        let mut visit = |bucket: &Vec<BinIndexEntry>| {
            hits.extend(
                bucket
                    .iter()
                    .filter(|e| e.overlaps(qmin, qmax))
                    .map(|e| e.chain_id),
            );
        };

        if let Some(bucket) = partition.get(&OVERFLOW_KEY) {
            visit(bucket);
        }
        for &scale in &BIN_SCALES {
            let (lo, hi) = (qmin / scale, qmax / scale);
            if lo == hi {
                if let Some(bucket) = partition.get(&(scale, lo)) {
                    visit(bucket);
                }
            } else {
                for (_, bucket) in partition.range((scale, lo)..=(scale, hi)) {
                    visit(bucket);
                }
            }
        }

        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

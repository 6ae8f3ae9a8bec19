//! Record store: one collection of records of a single kind, with an
//! optional bin index kept in step with every mutation.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::bin_index::{chain_entries, BinIndex, BinIndexEntry};
use crate::consolidate::{self, ChainRange};
use crate::error::{Error, Result};
use crate::record::{ChainId, Located, Record, RecordKind};
use crate::record_io::{read_records, write_records, OutputWriter};
use crate::union_find::UnionFind;

/// Everything a store needs to know, passed explicitly at construction
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Record shape held by the collection
    pub kind: RecordKind,
    /// Backing file; `None` keeps the store purely in memory
    pub path: Option<PathBuf>,
    /// Maintain the bin index (otherwise region queries scan)
    pub bin_index: bool,
}

impl StoreConfig {
    pub fn new(kind: RecordKind) -> Self {
        StoreConfig {
            kind,
            path: None,
            bin_index: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_bin_index(mut self, enabled: bool) -> Self {
        self.bin_index = enabled;
        self
    }
}

/// Persistence operations over one collection of records
///
/// Absent chain ids are never an error: lookups return nothing and
/// mutations do nothing.
pub trait RecordStore {
    fn kind(&self) -> RecordKind;

    fn insert(&mut self, record: Record) -> Result<()>;

    /// Insert every record or none of them
    fn insert_batch(&mut self, records: Vec<Record>) -> Result<usize>;

    fn get_by_chain_id(&self, id: ChainId) -> Vec<Record>;

    fn get_by_chain_ids(&self, ids: &[ChainId]) -> Vec<Record>;

    /// Records whose query range overlaps `[min(start,end), max(start,end)]` on `seq_name`
    fn get_by_region(&self, seq_name: &str, start: u64, end: u64) -> Result<Vec<Record>>;

    /// Returns the number of records removed
    fn delete_by_chain_id(&mut self, id: ChainId) -> usize;

    fn delete_by_chain_ids(&mut self, ids: &[ChainId]) -> usize;

    /// Relabel both chains to the smaller id, which is returned
    fn join_chains(&mut self, a: ChainId, b: ChainId) -> ChainId;

    /// `max(existing ids) + 1`, or 1 for an empty collection; assumes a single writer
    fn next_free_chain_id(&self) -> ChainId;
}

/// In-memory store, optionally backed by a tab-separated file
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    chains: BTreeMap<ChainId, Vec<Record>>,
    /// Named ranges, which carry no chain id
    unchained: Vec<Record>,
    index: Option<BinIndex>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        let index = config.bin_index.then(BinIndex::new);
        MemoryStore {
            config,
            chains: BTreeMap::new(),
            unchained: Vec::new(),
            index,
        }
    }

    /// Load the backing file when it exists; the whole file or nothing
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut store = MemoryStore::new(config);
        let Some(path) = store.config.path.clone() else {
            return Ok(store);
        };
        if !path.exists() {
            debug!("store {} does not exist yet, starting empty", path.display());
            return Ok(store);
        }

        let records = read_records(&path, Some(store.config.kind))?;
        store.place_all(records);
        store.rebuild_index();
        info!(
            "opened {} ({} records, {} chains, kind {})",
            path.display(),
            store.len(),
            store.chains.len(),
            store.config.kind
        );
        Ok(store)
    }

    /// Rewrite the backing file atomically; a no-op for purely in-memory stores
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.config.path.as_deref() else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(e, dir))?;
        let file = tmp.reopen().map_err(|e| Error::io(e, tmp.path()))?;
        let mut out = OutputWriter::new(file, path);
        let written = write_records(&mut out, self.records())?;
        out.finish().map_err(|e| Error::io(e, tmp.path()))?;
        tmp.persist(path).map_err(|e| Error::io(e.error, path))?;
        info!("wrote {written} records to {}", path.display());
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn index(&self) -> Option<&BinIndex> {
        self.index.as_ref()
    }

    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum::<usize>() + self.unchained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty() && self.unchained.is_empty()
    }

    /// Chain ids in increasing order
    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.keys().copied()
    }

    /// Every record, chains in id order followed by named ranges
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.chains.values().flatten().chain(self.unchained.iter())
    }

    pub fn chains(&self) -> impl Iterator<Item = (ChainId, &[Record])> {
        self.chains.iter().map(|(id, members)| (*id, members.as_slice()))
    }

    fn check_kind(&self, record: &Record) -> Result<()> {
        if record.kind() != self.config.kind {
            return Err(Error::malformed(format!(
                "{} record does not belong in a {} collection: {record}",
                record.kind(),
                self.config.kind
            )));
        }
        Ok(())
    }

    /// Append to the base rows only
    fn place(&mut self, record: Record) -> Option<ChainId> {
        match record.chain_id() {
            Some(id) => {
                self.chains.entry(id).or_default().push(record);
                Some(id)
            }
            None => {
                self.unchained.push(record);
                None
            }
        }
    }

    fn place_all(&mut self, records: Vec<Record>) -> BTreeSet<ChainId> {
        records
            .into_iter()
            .filter_map(|record| self.place(record))
            .collect()
    }

    /// Bring the index entries of one chain in line with its base rows
    fn reindex(&mut self, id: ChainId) {
        if let Some(index) = self.index.as_mut() {
            match self.chains.get(&id) {
                Some(members) => index.replace_chain(id, chain_entries(id, members)),
                None => {
                    index.remove_chain(id);
                }
            }
        }
    }

    /// Collapse one chain; `None` when the id is absent
    pub fn collapse_chain(&self, id: ChainId) -> Result<Option<ChainRange>> {
        match self.chains.get(&id) {
            Some(members) => consolidate::collapse_chain(members).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve join pairs transitively and relabel every connected group to
    /// its smallest id. Returns the id each touched chain now carries.
    pub fn join_many(&mut self, pairs: &[(ChainId, ChainId)]) -> BTreeMap<ChainId, ChainId> {
        let mut uf = UnionFind::new();
        for &(a, b) in pairs {
            uf.union(a, b);
        }
        let winners = uf.winners();

        let mut relabelled = 0;
        let mut touched = BTreeSet::new();
        for (&id, &winner) in &winners {
            if id == winner {
                continue;
            }
            if let Some(mut members) = self.chains.remove(&id) {
                relabelled += members.len();
                for record in &mut members {
                    record.set_chain_id(winner);
                }
                self.chains.entry(winner).or_default().extend(members);
            }
            touched.insert(id);
            touched.insert(winner);
        }
        for id in touched {
            self.reindex(id);
        }

        debug!(
            "join_many: {} pairs, {} chains involved, {relabelled} records relabelled",
            pairs.len(),
            winners.len()
        );
        winners
    }

    /// Run a consolidation pass over the members of `ids` and replace them
    /// with its output.
    ///
    /// The output must keep to the store's kind and to the chain ids it was
    /// given; otherwise nothing changes and an integrity error is returned.
    pub fn apply_pass<F>(&mut self, ids: &[ChainId], pass: F) -> Result<usize>
    where
        F: FnOnce(Vec<Record>) -> Result<Vec<Record>>,
    {
        let allowed: BTreeSet<ChainId> = ids.iter().copied().collect();
        let output = pass(self.get_by_chain_ids(ids))?;

        for record in &output {
            if record.kind() != self.config.kind {
                return Err(Error::integrity(format!(
                    "pass produced a {} record in a {} collection",
                    record.kind(),
                    self.config.kind
                )));
            }
            match record.chain_id() {
                Some(id) if allowed.contains(&id) => {}
                other => {
                    return Err(Error::integrity(format!(
                        "pass produced a record for chain {other:?} outside its input chains"
                    )))
                }
            }
        }

        for id in &allowed {
            self.chains.remove(id);
        }
        let written = output.len();
        self.place_all(output);
        for &id in &allowed {
            self.reindex(id);
        }
        debug!("pass over {} chains wrote {written} records", allowed.len());
        Ok(written)
    }

    /// Replace the whole collection with the output of a pass over all of it
    pub fn apply_pass_all<F>(&mut self, pass: F) -> Result<usize>
    where
        F: FnOnce(Vec<Record>) -> Result<Vec<Record>>,
    {
        let before = self.len();
        let output = pass(self.records().cloned().collect())?;
        if let Some(bad) = output.iter().find(|r| r.kind() != self.config.kind) {
            return Err(Error::integrity(format!(
                "pass produced a {} record in a {} collection",
                bad.kind(),
                self.config.kind
            )));
        }

        self.chains.clear();
        self.unchained.clear();
        let written = output.len();
        self.place_all(output);
        self.rebuild_index();
        info!("pass over the whole collection: {before} -> {written} records");
        Ok(written)
    }

    /// Build a complete replacement index, then swap it in
    pub fn rebuild_index(&mut self) {
        if !self.config.bin_index {
            return;
        }
        let entries: Vec<BinIndexEntry> = self
            .chains
            .par_iter()
            .flat_map_iter(|(id, members)| chain_entries(*id, members))
            .collect();
        self.index = Some(BinIndex::build(entries));
    }

    /// Check that the index matches a fresh derivation from the base rows
    pub fn verify_index(&self) -> Result<()> {
        let Some(index) = self.index.as_ref() else {
            warn!("store has no bin index, nothing to verify");
            return Ok(());
        };

        for id in index.chain_ids() {
            if !self.chains.contains_key(&id) {
                return Err(Error::integrity(format!(
                    "bin entry for chain {id} has no base rows"
                )));
            }
        }

        let mut expected_total = 0;
        for (&id, members) in &self.chains {
            let mut expected = chain_entries(id, members);
            let mut actual: Vec<BinIndexEntry> =
                index.entries_for_chain(id).into_iter().cloned().collect();
            expected.sort_by(|a, b| a.seq_name.cmp(&b.seq_name));
            actual.sort_by(|a, b| a.seq_name.cmp(&b.seq_name));
            if expected != actual {
                return Err(Error::integrity(format!(
                    "bin entries for chain {id} do not match its base rows \
                     (expected {}, indexed {})",
                    expected.len(),
                    actual.len()
                )));
            }
            expected_total += expected.len();
        }

        if expected_total != index.len() {
            return Err(Error::integrity(format!(
                "index holds {} entries, base rows derive {expected_total}",
                index.len()
            )));
        }
        debug!("bin index verified: {expected_total} entries");
        Ok(())
    }

    /// Replay every record through `insert` into an empty indexed store and
    /// check the incrementally maintained index against a batch build of the
    /// same rows.
    pub fn verify_replay(&self) -> Result<()> {
        let mut replay = MemoryStore::new(StoreConfig::new(self.config.kind));
        for record in self.records() {
            replay.insert(record.clone())?;
        }
        replay.verify_index()?;
        let replayed = replay.len();

        let batch = BinIndex::build(
            self.chains
                .iter()
                .flat_map(|(id, members)| chain_entries(*id, members)),
        );
        let incremental = replay.index.unwrap_or_default();
        if batch.len() != incremental.len() {
            return Err(Error::integrity(format!(
                "incremental index holds {} entries, batch build {}",
                incremental.len(),
                batch.len()
            )));
        }
        for id in batch.chain_ids() {
            let mut expected = batch.entries_for_chain(id);
            let mut actual = incremental.entries_for_chain(id);
            expected.sort_by(|a, b| a.seq_name.cmp(&b.seq_name));
            actual.sort_by(|a, b| a.seq_name.cmp(&b.seq_name));
            if expected != actual {
                return Err(Error::integrity(format!(
                    "incremental and batch index disagree on chain {id}"
                )));
            }
        }
        debug!("replayed {replayed} records, incremental index agrees");
        Ok(())
    }
}

fn overlapping<'a>(
    records: &'a [Record],
    seq_name: &'a str,
    min: u64,
    max: u64,
) -> impl Iterator<Item = &'a Record> {
    records.iter().filter(move |r| {
        let q = r.query();
        q.seq_name == seq_name && q.overlaps_span(min, max)
    })
}

impl RecordStore for MemoryStore {
    fn kind(&self) -> RecordKind {
        self.config.kind
    }

    fn insert(&mut self, record: Record) -> Result<()> {
        self.check_kind(&record)?;
        if let Some(id) = self.place(record) {
            self.reindex(id);
        }
        Ok(())
    }

    fn insert_batch(&mut self, records: Vec<Record>) -> Result<usize> {
        for record in &records {
            self.check_kind(record)?;
        }
        let count = records.len();
        for id in self.place_all(records) {
            self.reindex(id);
        }
        info!("inserted {count} {} records", self.config.kind);
        Ok(count)
    }

    fn get_by_chain_id(&self, id: ChainId) -> Vec<Record> {
        self.chains.get(&id).cloned().unwrap_or_default()
    }

    fn get_by_chain_ids(&self, ids: &[ChainId]) -> Vec<Record> {
        let wanted: BTreeSet<ChainId> = ids.iter().copied().collect();
        wanted
            .into_iter()
            .filter_map(|id| self.chains.get(&id))
            .flatten()
            .cloned()
            .collect()
    }

    fn get_by_region(&self, seq_name: &str, start: u64, end: u64) -> Result<Vec<Record>> {
        let (min, max) = (start.min(end), start.max(end));
        let mut hits: Vec<Record> = Vec::new();

        match self.index.as_ref() {
            Some(index) => {
                let candidates = index.candidates(seq_name, min, max);
                for id in &candidates {
                    let members = self.chains.get(id).ok_or_else(|| {
                        Error::integrity(format!("bin entry for chain {id} has no base rows"))
                    })?;
                    hits.extend(overlapping(members, seq_name, min, max).cloned());
                }
                debug!(
                    "region {seq_name}:{min}-{max}: {} candidate chains, {} records",
                    candidates.len(),
                    hits.len()
                );
            }
            None => {
                for members in self.chains.values() {
                    hits.extend(overlapping(members, seq_name, min, max).cloned());
                }
            }
        }

        hits.extend(overlapping(&self.unchained, seq_name, min, max).cloned());
        Ok(hits)
    }

    fn delete_by_chain_id(&mut self, id: ChainId) -> usize {
        let removed = self.chains.remove(&id).map_or(0, |members| members.len());
        self.reindex(id);
        removed
    }

    fn delete_by_chain_ids(&mut self, ids: &[ChainId]) -> usize {
        ids.iter().map(|&id| self.delete_by_chain_id(id)).sum()
    }

    fn join_chains(&mut self, a: ChainId, b: ChainId) -> ChainId {
        let (winner, loser) = (a.min(b), a.max(b));
        if winner == loser {
            return winner;
        }
        if let Some(mut members) = self.chains.remove(&loser) {
            for record in &mut members {
                record.set_chain_id(winner);
            }
            debug!("join {loser} -> {winner}: {} records relabelled", members.len());
            self.chains.entry(winner).or_default().extend(members);
        }
        self.reindex(loser);
        self.reindex(winner);
        winner
    }

    fn next_free_chain_id(&self) -> ChainId {
        self.chains
            .keys()
            .next_back()
            .map_or(1, |max| max.saturating_add(1))
    }
}

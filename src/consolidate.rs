//! Chain consolidation: storage-independent passes over record collections.
//!
//! Every function here is pure. The store pulls the members of one or more
//! chains, hands them to one of these passes and writes the result back.

use indexmap::IndexMap;
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::range::{covered_length, Range};
use crate::record::{
    AlignmentFragment, AlignmentStats, ChainId, GroupedRange, Located, NamedRange, Record,
};

impl<T: Located + ?Sized> Located for &T {
    fn chain_id(&self) -> Option<ChainId> {
        (**self).chain_id()
    }
    fn query(&self) -> &Range {
        (**self).query()
    }
    fn subject(&self) -> Option<&Range> {
        (**self).subject()
    }
    fn label(&self) -> Option<&str> {
        (**self).label()
    }
    fn stats(&self) -> Option<AlignmentStats> {
        (**self).stats()
    }
}

/// Records that can swallow an overlapping neighbour
pub trait Mergeable: Located {
    /// Grow `self` to cover `other`, combining statistics
    fn absorb(&mut self, other: &Self);
}

impl Mergeable for NamedRange {
    fn absorb(&mut self, other: &Self) {
        self.range.expand(&other.range);
    }
}

impl Mergeable for GroupedRange {
    fn absorb(&mut self, other: &Self) {
        self.range.expand(&other.range);
    }
}

impl Mergeable for AlignmentFragment {
    fn absorb(&mut self, other: &Self) {
        // identity is weighted by query length, taken before the bounds grow
        let (w_self, w_other) = (self.query.length() as f64, other.query.length() as f64);
        self.identity = (self.identity * w_self + other.identity * w_other) / (w_self + w_other);
        self.score += other.score;
        self.e_value = self.e_value.min(other.e_value);

        if self.query.seq_name == other.query.seq_name {
            self.query.expand(&other.query);
        }
        if self.subject.seq_name == other.subject.seq_name {
            self.subject.expand(&other.subject);
        }
    }
}

impl Mergeable for Record {
    fn absorb(&mut self, other: &Self) {
        match (self, other) {
            (Record::Named(a), Record::Named(b)) => a.absorb(b),
            (Record::Grouped(a), Record::Grouped(b)) => a.absorb(b),
            (Record::Fragment(a), Record::Fragment(b)) => a.absorb(b),
            // the overlap tests never pair different kinds
            _ => {}
        }
    }
}

/// Which axes must overlap for two records to be merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapTest {
    /// Query and subject both overlap: biologically compatible fragments
    QueryAndSubject,
    /// Query overlap alone: collapse redundant hits whatever their subject
    QueryOnly,
}

impl OverlapTest {
    pub fn overlaps<T: Located>(&self, a: &T, b: &T) -> bool {
        if !a.query().overlaps(b.query()) {
            return false;
        }
        match (self, a.subject(), b.subject()) {
            (OverlapTest::QueryAndSubject, Some(sa), Some(sb)) => sa.overlaps(sb),
            (_, None, None) => true,
            (OverlapTest::QueryOnly, Some(_), Some(_)) => true,
            _ => false,
        }
    }
}

/// Sort by `(min, 1/length)`: ascending start, longer first among equal starts
fn sort_for_merge<T: Located>(records: &mut [T]) {
    records.sort_by(|a, b| {
        let (qa, qb) = (a.query(), b.query());
        qa.min()
            .cmp(&qb.min())
            .then_with(|| qb.length().cmp(&qa.length()))
    });
}

/// One greedy sweep; returns the merged records and whether anything was absorbed
fn merge_pass<T: Mergeable>(records: Vec<T>, test: OverlapTest) -> (Vec<T>, bool) {
    let mut retired: Vec<T> = Vec::with_capacity(records.len());
    let mut active: Vec<T> = Vec::new();
    let mut absorbed = false;

    for record in records {
        // later records start at or after this one, so anything ending before
        // it can never be touched again
        let lo = record.query().min();
        if active.iter().any(|p| p.query().max() < lo) {
            let (done, open): (Vec<T>, Vec<T>) =
                active.drain(..).partition(|p| p.query().max() < lo);
            retired.extend(done);
            active = open;
        }

        match active.iter_mut().find(|p| test.overlaps(&**p, &record)) {
            Some(target) => {
                target.absorb(&record);
                absorbed = true;
            }
            None => active.push(record),
        }
    }

    retired.extend(active);
    (retired, absorbed)
}

/// Merge overlapping records until no two results overlap under `test`.
///
/// Each placed record absorbs every later record that overlaps it; passes
/// repeat until one absorbs nothing, since growing a record can make it
/// reach a neighbour that was placed earlier.
pub fn merge_overlapping<T: Mergeable>(mut records: Vec<T>, test: OverlapTest) -> Vec<T> {
    let input = records.len();
    let mut passes = 0;
    loop {
        sort_for_merge(&mut records);
        let (merged, absorbed) = merge_pass(records, test);
        records = merged;
        passes += 1;
        if !absorbed {
            break;
        }
    }
    sort_for_merge(&mut records);
    debug!(
        "merge_overlapping({test:?}): {input} -> {} records in {passes} passes",
        records.len()
    );
    records
}

/// Merge overlapping records inside each chain, never across chains.
/// Records without a chain id are merged among themselves.
pub fn merge_within_chains<T: Mergeable + Send>(records: Vec<T>, test: OverlapTest) -> Vec<T> {
    let mut groups: IndexMap<Option<ChainId>, Vec<T>> = IndexMap::new();
    for record in records {
        groups.entry(record.chain_id()).or_default().push(record);
    }
    groups
        .into_values()
        .collect::<Vec<_>>()
        .into_par_iter()
        .flat_map_iter(|members| merge_overlapping(members, test))
        .collect()
}

/// One consolidated range per chain, with aggregated statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRange {
    pub chain_id: ChainId,
    pub label: Option<String>,
    pub query: Range,
    pub subject: Option<Range>,
    pub stats: Option<AlignmentStats>,
    pub member_count: usize,
}

impl ChainRange {
    /// Line form: a fragment for alignment chains, a grouped range otherwise
    pub fn to_record(&self) -> Record {
        match (&self.subject, self.stats) {
            (Some(subject), Some(stats)) => Record::Fragment(AlignmentFragment {
                chain_id: self.chain_id,
                query: self.query.clone(),
                subject: subject.clone(),
                e_value: stats.e_value,
                score: stats.score,
                identity: stats.identity,
            }),
            _ => Record::Grouped(GroupedRange {
                chain_id: self.chain_id,
                name: self.label.clone().unwrap_or_else(|| format!("chain{}", self.chain_id)),
                range: self.query.clone(),
            }),
        }
    }
}

impl fmt::Display for ChainRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_record(), f)
    }
}

impl Located for ChainRange {
    fn chain_id(&self) -> Option<ChainId> {
        Some(self.chain_id)
    }
    fn query(&self) -> &Range {
        &self.query
    }
    fn subject(&self) -> Option<&Range> {
        self.subject.as_ref()
    }
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    fn stats(&self) -> Option<AlignmentStats> {
        self.stats
    }
}

/// Span of a set of ranges on one axis, oriented like the first oriented member
fn combine_axis<'a, I: Iterator<Item = &'a Range>>(ranges: I) -> Range {
    let mut ranges = ranges.peekable();
    let seq_name = ranges
        .peek()
        .map(|r| r.seq_name.clone())
        .unwrap_or_default();

    let mut lo = u64::MAX;
    let mut hi = 0;
    let mut direct = None;
    for r in ranges {
        lo = lo.min(r.min());
        hi = hi.max(r.max());
        if direct.is_none() && r.start != r.end {
            direct = Some(r.is_direct());
        }
    }

    // direct: start = min(starts), end = max(ends); reverse: start = max(starts), end = min(ends)
    if direct.unwrap_or(true) {
        Range::new(seq_name, lo, hi)
    } else {
        Range::new(seq_name, hi, lo)
    }
}

/// Collapse the members of one chain into a single [`ChainRange`].
///
/// All members must carry the same chain id, sit on the same query sequence
/// and, when they have a subject, the same subject sequence and strand.
/// Scores add up, the e-value is the minimum and identity is the mean
/// weighted by each member's query length.
pub fn collapse_chain<T: Located>(members: &[T]) -> Result<ChainRange> {
    let first = members
        .first()
        .ok_or_else(|| Error::integrity("cannot collapse an empty chain"))?;
    let chain_id = first
        .chain_id()
        .ok_or_else(|| Error::integrity("a record without a chain id cannot be collapsed"))?;
    let query_name = &first.query().seq_name;
    let first_subject = first.subject();

    for member in members {
        if member.chain_id() != Some(chain_id) {
            return Err(Error::integrity(format!(
                "chain {chain_id} mixes members of chain {:?}",
                member.chain_id()
            )));
        }
        if member.query().seq_name != *query_name {
            return Err(Error::integrity(format!(
                "chain {chain_id} spans query sequences {query_name} and {}",
                member.query().seq_name
            )));
        }
        match (first_subject, member.subject()) {
            (Some(s0), Some(s)) => {
                if s.seq_name != s0.seq_name {
                    return Err(Error::integrity(format!(
                        "chain {chain_id} spans subject sequences {} and {}",
                        s0.seq_name, s.seq_name
                    )));
                }
                if s.is_direct() != s0.is_direct() {
                    return Err(Error::integrity(format!(
                        "chain {chain_id} mixes subject strands"
                    )));
                }
            }
            (None, None) => {}
            _ => {
                return Err(Error::integrity(format!(
                    "chain {chain_id} mixes alignment fragments and plain ranges"
                )))
            }
        }
    }

    let query = combine_axis(members.iter().map(|m| m.query()));
    let subject = first_subject.map(|_| combine_axis(members.iter().filter_map(|m| m.subject())));

    let stats = members
        .iter()
        .map(|m| m.stats().map(|s| (s, m.query().length() as f64)))
        .collect::<Option<Vec<_>>>()
        .map(|weighted| {
            let total_length: f64 = weighted.iter().map(|(_, len)| len).sum();
            AlignmentStats {
                score: weighted.iter().map(|(s, _)| s.score).sum(),
                e_value: weighted
                    .iter()
                    .map(|(s, _)| s.e_value)
                    .fold(f64::INFINITY, f64::min),
                identity: weighted.iter().map(|(s, len)| s.identity * len).sum::<f64>()
                    / total_length,
            }
        });

    Ok(ChainRange {
        chain_id,
        label: first.label().map(str::to_string),
        query,
        subject,
        stats,
        member_count: members.len(),
    })
}

/// Group records by chain id, keeping first-seen order
pub fn group_by_chain<T: Located>(records: &[T]) -> IndexMap<Option<ChainId>, Vec<&T>> {
    let mut groups: IndexMap<Option<ChainId>, Vec<&T>> = IndexMap::new();
    for record in records {
        groups.entry(record.chain_id()).or_default().push(record);
    }
    groups
}

/// Collapse every chain of a collection, in first-seen chain order
pub fn collapse_all<T: Located + Sync>(records: &[T]) -> Result<Vec<ChainRange>> {
    let groups: Vec<(Option<ChainId>, Vec<&T>)> = group_by_chain(records).into_iter().collect();
    let collapsed = groups
        .par_iter()
        .map(|(_, members)| collapse_chain(members))
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "collapsed {} records into {} chains",
        records.len(),
        collapsed.len()
    );
    Ok(collapsed)
}

type SubjectKey<'a> = Option<(&'a str, u64, u64)>;
type StatsKey = Option<(OrderedFloat<f64>, OrderedFloat<f64>, OrderedFloat<f64>)>;

fn subject_key<T: Located>(record: &T) -> SubjectKey<'_> {
    record
        .subject()
        .map(|s| (s.seq_name.as_str(), s.start, s.end))
}

fn stats_key<T: Located>(record: &T) -> StatsKey {
    record.stats().map(|s| {
        (
            OrderedFloat(s.e_value),
            OrderedFloat(s.score),
            OrderedFloat(s.identity),
        )
    })
}

/// `(queryMin, queryMax[, chainId])`, then every remaining field so that
/// equal records always end up next to each other
fn duplicate_order<T: Located>(a: &T, b: &T, coordinates_only: bool) -> Ordering {
    let (qa, qb) = (a.query(), b.query());
    qa.sort_key()
        .cmp(&qb.sort_key())
        .then_with(|| {
            if coordinates_only {
                Ordering::Equal
            } else {
                a.chain_id().cmp(&b.chain_id())
            }
        })
        .then_with(|| qa.seq_name.cmp(&qb.seq_name))
        .then_with(|| qa.start.cmp(&qb.start))
        .then_with(|| subject_key(a).cmp(&subject_key(b)))
        .then_with(|| a.label().cmp(&b.label()))
        .then_with(|| stats_key(a).cmp(&stats_key(b)))
}

fn same_coordinates<T: Located>(a: &T, b: &T) -> bool {
    a.query() == b.query() && a.subject() == b.subject()
}

/// Drop doublons.
///
/// With `coordinates_only` two records are duplicates when their query and
/// subject ranges (names included) match, whatever their chain id and
/// statistics; otherwise every field must match.
pub fn remove_duplicates<T: Located + PartialEq>(mut records: Vec<T>, coordinates_only: bool) -> Vec<T> {
    let input = records.len();
    records.sort_by(|a, b| duplicate_order(a, b, coordinates_only));
    if coordinates_only {
        records.dedup_by(|later, kept| same_coordinates(&*later, &*kept));
    } else {
        records.dedup_by(|later, kept| later == kept);
    }
    debug!(
        "remove_duplicates(coordinates_only={coordinates_only}): dropped {}",
        input - records.len()
    );
    records
}

/// Keep records whose chain covers at least `min_length` bases on the query axis.
///
/// Overlapping query ranges of one chain are counted once. Records without a
/// chain id are judged on their own length.
pub fn filter_chains_by_length<T: Located>(records: Vec<T>, min_length: u64) -> Vec<T> {
    let totals: HashMap<ChainId, u64> = {
        let mut spans: HashMap<ChainId, HashMap<&str, Vec<(u64, u64)>>> = HashMap::new();
        for record in &records {
            if let Some(id) = record.chain_id() {
                let q = record.query();
                spans
                    .entry(id)
                    .or_default()
                    .entry(q.seq_name.as_str())
                    .or_default()
                    .push((q.min(), q.max()));
            }
        }
        spans
            .into_iter()
            .map(|(id, per_seq)| {
                let total = per_seq
                    .into_values()
                    .map(covered_length)
                    .fold(0u64, u64::saturating_add);
                (id, total)
            })
            .collect()
    };

    let input = records.len();
    let kept: Vec<T> = records
        .into_iter()
        .filter(|r| match r.chain_id() {
            Some(id) => totals.get(&id).copied().unwrap_or(0) >= min_length,
            None => r.query().length() >= min_length,
        })
        .collect();
    debug!(
        "filter_chains_by_length(min={min_length}): {input} -> {} records",
        kept.len()
    );
    kept
}

/// Split `to_split` into the maximal runs lying strictly between consecutive anchors.
///
/// Anchors only bound records on their own query sequence. Within a
/// sequence both inputs are sorted by increasing `(queryMin, queryMax)`.
/// Records that touch an anchor, or lie before the first or after the last
/// anchor, belong to no run and leave the surrounding run open.
pub fn split_by_anchor<A: Located, T: Located + Clone>(anchors: &[A], to_split: &[T]) -> Vec<Vec<T>> {
    // per sequence: anchor mins, and the furthest end among anchors[0..=i]
    let mut tables: HashMap<&str, (Vec<u64>, Vec<u64>)> = HashMap::new();
    for anchor in anchors {
        let q = anchor.query();
        let (mins, reach) = tables.entry(q.seq_name.as_str()).or_default();
        let furthest = reach.last().map_or(q.max(), |&r| r.max(q.max()));
        mins.push(q.min());
        reach.push(furthest);
    }

    let mut runs: Vec<Vec<T>> = Vec::new();
    let mut open: IndexMap<&str, (usize, Vec<T>)> = IndexMap::new();

    for record in to_split {
        let q = record.query();
        let seq = q.seq_name.as_str();
        let Some((mins, reach)) = tables.get(seq) else {
            continue;
        };
        // first anchor starting after the record ends
        let right = mins.partition_point(|&m| m <= q.max());
        if right == 0 || right >= mins.len() || reach[right - 1] >= q.min() {
            continue;
        }

        match open.get_mut(seq) {
            Some((gap, run)) if *gap == right => run.push(record.clone()),
            Some(slot) => {
                let (_, done) = std::mem::replace(slot, (right, vec![record.clone()]));
                runs.push(done);
            }
            None => {
                open.insert(seq, (right, vec![record.clone()]));
            }
        }
    }
    runs.extend(open.into_values().map(|(_, run)| run));

    debug!(
        "split_by_anchor: {} anchors, {} records -> {} runs",
        anchors.len(),
        to_split.len(),
        runs.len()
    );
    runs
}

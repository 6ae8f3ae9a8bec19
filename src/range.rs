/// Ranges on a named sequence
///
/// Orientation is carried by the order of `start` and `end`: a range whose
/// start is below its end lies on the direct strand, anything else is read
/// as reverse. Bounds are inclusive.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub seq_name: String,
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(seq_name: impl Into<String>, start: u64, end: u64) -> Self {
        Range {
            seq_name: seq_name.into(),
            start,
            end,
        }
    }

    pub fn min(&self) -> u64 {
        self.start.min(self.end)
    }

    pub fn max(&self) -> u64 {
        self.start.max(self.end)
    }

    /// Inclusive length, `|end - start| + 1`, saturating for a span over every `u64`
    pub fn length(&self) -> u64 {
        (self.max() - self.min()).saturating_add(1)
    }

    pub fn is_direct(&self) -> bool {
        self.start < self.end
    }

    /// Overlap with another range on the same sequence
    pub fn overlaps(&self, other: &Range) -> bool {
        self.seq_name == other.seq_name && self.overlaps_span(other.min(), other.max())
    }

    /// Overlap with `[min, max]`, ignoring the sequence name
    pub fn overlaps_span(&self, min: u64, max: u64) -> bool {
        self.min() <= max && self.max() >= min
    }

    /// Grow this range so it also covers `other`, keeping its orientation.
    ///
    /// A single-base range has no orientation of its own and takes the
    /// orientation of `other`.
    pub fn expand(&mut self, other: &Range) {
        let lo = self.min().min(other.min());
        let hi = self.max().max(other.max());
        let direct = if self.start != self.end {
            self.is_direct()
        } else {
            other.start <= other.end
        };
        if direct {
            self.start = lo;
            self.end = hi;
        } else {
            self.start = hi;
            self.end = lo;
        }
    }

    /// Key used to order ranges by `(min, max)`
    pub fn sort_key(&self) -> (u64, u64) {
        (self.min(), self.max())
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.seq_name, self.start, self.end)
    }
}

/// Total length of the union of inclusive `(min, max)` spans, saturating at `u64::MAX`
pub fn covered_length(mut spans: Vec<(u64, u64)>) -> u64 {
    if spans.is_empty() {
        return 0;
    }
    spans.sort_unstable();

    let span_len = |lo: u64, hi: u64| (hi - lo).saturating_add(1);
    let mut total: u64 = 0;
    let (mut cur_lo, mut cur_hi) = spans[0];
    for &(lo, hi) in &spans[1..] {
        if lo <= cur_hi {
            cur_hi = cur_hi.max(hi);
        } else {
            total = total.saturating_add(span_len(cur_lo, cur_hi));
            cur_lo = lo;
            cur_hi = hi;
        }
    }
    total.saturating_add(span_len(cur_lo, cur_hi))
}

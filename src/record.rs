use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::range::Range;

/// Identifier shared by every member of one chain
pub type ChainId = u64;

/// Plain annotation, e.g. an ORF call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRange {
    pub name: String,
    pub range: Range,
}

/// Range belonging to a group of ranges that share a chain id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedRange {
    pub chain_id: ChainId,
    pub name: String,
    pub range: Range,
}

/// One local alignment; fragments sharing a chain id form one chain
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentFragment {
    pub chain_id: ChainId,
    pub query: Range,
    pub subject: Range,
    pub e_value: f64,
    pub score: f64,
    pub identity: f64, // percentage, 0-100
}

/// Alignment statistics carried by fragments and collapsed chains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentStats {
    pub e_value: f64,
    pub score: f64,
    pub identity: f64,
}

/// Closed set of record shapes a collection can hold
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Named(NamedRange),
    Grouped(GroupedRange),
    Fragment(AlignmentFragment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Named,
    Grouped,
    Fragment,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Named, RecordKind::Grouped, RecordKind::Fragment];

    /// Number of tab-separated fields in the line form
    pub fn field_count(&self) -> usize {
        match self {
            RecordKind::Named => 4,
            RecordKind::Grouped => 5,
            RecordKind::Fragment => 10,
        }
    }

    pub fn from_field_count(n: usize) -> Option<RecordKind> {
        Self::ALL.into_iter().find(|kind| kind.field_count() == n)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Named => "named",
            RecordKind::Grouped => "grouped",
            RecordKind::Fragment => "fragment",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "named" | "named-range" => Ok(RecordKind::Named),
            "grouped" | "grouped-range" => Ok(RecordKind::Grouped),
            "fragment" | "alignment" | "alignment-fragment" => Ok(RecordKind::Fragment),
            _ => Err(Error::malformed(format!(
                "unknown record kind '{s}' (expected named, grouped or fragment)"
            ))),
        }
    }
}

/// Read-only view shared by every record type, so the consolidation engine
/// can work on any of them
pub trait Located {
    fn chain_id(&self) -> Option<ChainId>;

    fn query(&self) -> &Range;

    fn subject(&self) -> Option<&Range> {
        None
    }

    fn label(&self) -> Option<&str> {
        None
    }

    fn stats(&self) -> Option<AlignmentStats> {
        None
    }
}

impl Located for NamedRange {
    fn chain_id(&self) -> Option<ChainId> {
        None
    }
    fn query(&self) -> &Range {
        &self.range
    }
    fn label(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl Located for GroupedRange {
    fn chain_id(&self) -> Option<ChainId> {
        Some(self.chain_id)
    }
    fn query(&self) -> &Range {
        &self.range
    }
    fn label(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl Located for AlignmentFragment {
    fn chain_id(&self) -> Option<ChainId> {
        Some(self.chain_id)
    }
    fn query(&self) -> &Range {
        &self.query
    }
    fn subject(&self) -> Option<&Range> {
        Some(&self.subject)
    }
    fn stats(&self) -> Option<AlignmentStats> {
        Some(AlignmentStats {
            e_value: self.e_value,
            score: self.score,
            identity: self.identity,
        })
    }
}

impl Located for Record {
    fn chain_id(&self) -> Option<ChainId> {
        match self {
            Record::Named(r) => r.chain_id(),
            Record::Grouped(r) => r.chain_id(),
            Record::Fragment(r) => r.chain_id(),
        }
    }

    fn query(&self) -> &Range {
        match self {
            Record::Named(r) => r.query(),
            Record::Grouped(r) => r.query(),
            Record::Fragment(r) => r.query(),
        }
    }

    fn subject(&self) -> Option<&Range> {
        match self {
            Record::Fragment(r) => r.subject(),
            Record::Named(_) | Record::Grouped(_) => None,
        }
    }

    fn label(&self) -> Option<&str> {
        match self {
            Record::Named(r) => r.label(),
            Record::Grouped(r) => r.label(),
            Record::Fragment(_) => None,
        }
    }

    fn stats(&self) -> Option<AlignmentStats> {
        match self {
            Record::Fragment(r) => r.stats(),
            Record::Named(_) | Record::Grouped(_) => None,
        }
    }
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Named(_) => RecordKind::Named,
            Record::Grouped(_) => RecordKind::Grouped,
            Record::Fragment(_) => RecordKind::Fragment,
        }
    }

    /// Parse a line, detecting the kind from its field count
    pub fn from_line(line: &str) -> Result<Record> {
        let fields = split_fields(line);
        let kind = RecordKind::from_field_count(fields.len()).ok_or_else(|| {
            Error::malformed(format!(
                "expected 4, 5 or 10 tab-separated fields, found {}",
                fields.len()
            ))
        })?;
        Self::from_fields(&fields, kind)
    }

    /// Parse a line that must have the shape of `kind`
    pub fn parse_as(line: &str, kind: RecordKind) -> Result<Record> {
        Self::from_fields(&split_fields(line), kind)
    }

    fn from_fields(fields: &[&str], kind: RecordKind) -> Result<Record> {
        if fields.len() != kind.field_count() {
            return Err(Error::malformed(format!(
                "{kind} record needs {} tab-separated fields, found {}",
                kind.field_count(),
                fields.len()
            )));
        }

        let record = match kind {
            RecordKind::Named => Record::Named(NamedRange {
                name: name_field(fields, 0, "name")?,
                range: Range::new(
                    name_field(fields, 1, "sequence name")?,
                    parse_field(fields, 2, "start")?,
                    parse_field(fields, 3, "end")?,
                ),
            }),
            RecordKind::Grouped => Record::Grouped(GroupedRange {
                chain_id: parse_field(fields, 0, "chain id")?,
                name: name_field(fields, 1, "name")?,
                range: Range::new(
                    name_field(fields, 2, "sequence name")?,
                    parse_field(fields, 3, "start")?,
                    parse_field(fields, 4, "end")?,
                ),
            }),
            RecordKind::Fragment => {
                let e_value: f64 = parse_field(fields, 7, "e-value")?;
                let score: f64 = parse_field(fields, 8, "score")?;
                let identity: f64 = parse_field(fields, 9, "identity")?;
                if !e_value.is_finite() || e_value < 0.0 {
                    return Err(Error::malformed(format!("invalid e-value '{}'", fields[7])));
                }
                if !score.is_finite() {
                    return Err(Error::malformed(format!("invalid score '{}'", fields[8])));
                }
                if !(0.0..=100.0).contains(&identity) {
                    return Err(Error::malformed(format!(
                        "identity '{}' outside 0-100",
                        fields[9]
                    )));
                }

                Record::Fragment(AlignmentFragment {
                    chain_id: parse_field(fields, 0, "chain id")?,
                    query: Range::new(
                        name_field(fields, 1, "query name")?,
                        parse_field(fields, 2, "query start")?,
                        parse_field(fields, 3, "query end")?,
                    ),
                    subject: Range::new(
                        name_field(fields, 4, "subject name")?,
                        parse_field(fields, 5, "subject start")?,
                        parse_field(fields, 6, "subject end")?,
                    ),
                    e_value,
                    score,
                    identity,
                })
            }
        };

        Ok(record)
    }

    /// Relabel the chain id; named ranges carry none and are left alone
    pub fn set_chain_id(&mut self, id: ChainId) {
        match self {
            Record::Named(_) => {}
            Record::Grouped(r) => r.chain_id = id,
            Record::Fragment(r) => r.chain_id = id,
        }
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n']).split('\t').collect()
}

fn parse_field<T: FromStr>(fields: &[&str], idx: usize, what: &str) -> Result<T> {
    fields[idx]
        .trim()
        .parse()
        .map_err(|_| Error::malformed(format!("invalid {what} '{}'", fields[idx])))
}

fn name_field(fields: &[&str], idx: usize, what: &str) -> Result<String> {
    let value = fields[idx].trim();
    if value.is_empty() {
        return Err(Error::malformed(format!("empty {what}")));
    }
    Ok(value.to_string())
}

/// Small e-values are written in exponent form to keep lines short
pub(crate) fn format_e_value(e_value: f64) -> String {
    if e_value == 0.0 || (1e-4..1e6).contains(&e_value) {
        format!("{e_value}")
    } else {
        format!("{e_value:e}")
    }
}

impl fmt::Display for NamedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.name, self.range)
    }
}

impl fmt::Display for GroupedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.chain_id, self.name, self.range)
    }
}

impl fmt::Display for AlignmentFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.chain_id,
            self.query,
            self.subject,
            format_e_value(self.e_value),
            self.score,
            self.identity
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Named(r) => fmt::Display::fmt(r, f),
            Record::Grouped(r) => fmt::Display::fmt(r, f),
            Record::Fragment(r) => fmt::Display::fmt(r, f),
        }
    }
}

impl FromStr for Record {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Record::from_line(s)
    }
}

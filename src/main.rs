use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chainstore::chain_view::ChainView;
use chainstore::consolidate::{
    filter_chains_by_length, merge_within_chains, remove_duplicates, split_by_anchor, OverlapTest,
};
use chainstore::record::{ChainId, Located, Record, RecordKind};
use chainstore::record_io::{read_records, sniff_kind, write_records};
use chainstore::store::{MemoryStore, RecordStore, StoreConfig};

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
fn parse_metric_number(s: &str) -> Result<u64, String> {
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c)),
        _ => (s, None),
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;

    if !(0.0..=u64::MAX as f64).contains(&result) {
        return Err(format!("Value {result} out of range"));
    }

    Ok(result as u64)
}

/// chainstore - genomic interval store with a hierarchical bin index
///
/// Every subcommand is one batch step over a tab-separated store file
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Store file (.gz/.bgz are block-gzipped)
    #[clap(short = 's', long = "store", global = true)]
    store: Option<PathBuf>,

    /// Record kind: named, grouped or fragment (detected from the data when omitted)
    #[clap(short = 'k', long = "kind", global = true)]
    kind: Option<RecordKind>,

    /// Answer region queries by scanning instead of through the bin index
    #[clap(long = "no-index", global = true)]
    no_index: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[clap(long = "quiet", global = true)]
    quiet: bool,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "4", global = true)]
    threads: usize,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse record files and add them to the store; one bad line rejects everything
    Load {
        #[clap(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print records overlapping a region
    Query {
        seq_name: String,
        start: u64,
        end: u64,
    },

    /// Print the records of the given chains
    Get {
        #[clap(required = true)]
        ids: Vec<ChainId>,
    },

    /// Remove the given chains
    Delete {
        #[clap(required = true)]
        ids: Vec<ChainId>,
    },

    /// Merge two chains under the smaller id and print it
    Join { a: ChainId, b: ChainId },

    /// Print the next unused chain id
    NextId,

    /// Print one consolidated range per chain (all chains when no id is given)
    Collapse { ids: Vec<ChainId> },

    /// Region query over the collapsed chains
    Chains {
        seq_name: String,
        start: u64,
        end: u64,
    },

    /// Remove duplicate records
    Dedup {
        /// Compare coordinates and sequence names only
        #[clap(long = "coordinates-only")]
        coordinates_only: bool,
    },

    /// Merge overlapping records within each chain
    Merge {
        /// Merge on query overlap alone, ignoring the subject
        #[clap(long = "query-only")]
        query_only: bool,
    },

    /// Drop chains covering fewer query bases than the threshold
    FilterLength {
        #[clap(short = 'l', long = "min-length", value_parser = parse_metric_number)]
        min_length: u64,
    },

    /// Print the runs of INPUT lying strictly between consecutive anchors
    Split {
        /// Anchor records
        #[clap(short = 'a', long = "anchors")]
        anchors: PathBuf,

        #[clap(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Check the bin index, replay every insert against a batch build, and
    /// collapse every chain
    Verify,
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        log::LevelFilter::Error
    } else {
        match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn store_path(args: &Args) -> Result<&Path> {
    match args.store.as_deref() {
        Some(path) => Ok(path),
        None => bail!("this command needs a store file (-s/--store)"),
    }
}

/// Kind from the flag, else from the store file, else from the first readable fallback
fn resolve_kind(args: &Args, fallback: &[PathBuf]) -> Result<RecordKind> {
    if let Some(kind) = args.kind {
        return Ok(kind);
    }
    let path = store_path(args)?;
    let candidates = std::iter::once(path).chain(fallback.iter().map(PathBuf::as_path));
    for candidate in candidates {
        if candidate.exists() {
            if let Some(kind) = sniff_kind(candidate)
                .with_context(|| format!("Failed to detect record kind of {}", candidate.display()))?
            {
                return Ok(kind);
            }
        }
    }
    bail!("cannot detect the record kind; pass -k/--kind")
}

fn open_store(args: &Args, fallback: &[PathBuf]) -> Result<MemoryStore> {
    let path = store_path(args)?;
    let config = StoreConfig::new(resolve_kind(args, fallback)?)
        .with_path(path)
        .with_bin_index(!args.no_index);
    MemoryStore::open(config).with_context(|| format!("Failed to open store {}", path.display()))
}

fn stdout() -> BufWriter<io::StdoutLock<'static>> {
    BufWriter::new(io::stdout().lock())
}

fn print_records(records: &[Record]) -> Result<()> {
    write_records(&mut stdout(), records)?;
    Ok(())
}

fn sorted_for_split(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by_key(|r| r.query().sort_key());
    records
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Load { inputs } => {
            let mut store = open_store(args, inputs)?;
            let kind = store.kind();
            let mut batch = Vec::new();
            for input in inputs {
                let records = read_records(input, Some(kind))
                    .with_context(|| format!("Failed to load {}", input.display()))?;
                info!("{}: {} records", input.display(), records.len());
                batch.extend(records);
            }
            let count = store.insert_batch(batch)?;
            store.flush()?;
            info!("loaded {count} records, store now holds {}", store.len());
        }

        Command::Query { seq_name, start, end } => {
            let store = open_store(args, &[])?;
            print_records(&store.get_by_region(seq_name, *start, *end)?)?;
        }

        Command::Get { ids } => {
            let store = open_store(args, &[])?;
            print_records(&store.get_by_chain_ids(ids))?;
        }

        Command::Delete { ids } => {
            let mut store = open_store(args, &[])?;
            let removed = store.delete_by_chain_ids(ids);
            store.flush()?;
            info!("deleted {removed} records");
        }

        Command::Join { a, b } => {
            let mut store = open_store(args, &[])?;
            let winner = store.join_chains(*a, *b);
            store.flush()?;
            writeln!(stdout(), "{winner}")?;
        }

        Command::NextId => {
            let store = open_store(args, &[])?;
            writeln!(stdout(), "{}", store.next_free_chain_id())?;
        }

        Command::Collapse { ids } => {
            let store = open_store(args, &[])?;
            let ids: Vec<ChainId> = if ids.is_empty() {
                store.chain_ids().collect()
            } else {
                ids.clone()
            };
            let mut out = stdout();
            for id in ids {
                if let Some(range) = store.collapse_chain(id)? {
                    writeln!(out, "{range}")?;
                }
            }
            out.flush()?;
        }

        Command::Chains { seq_name, start, end } => {
            let store = open_store(args, &[])?;
            let view = ChainView::build(&store)?;
            let mut out = stdout();
            for range in view.query(seq_name, *start, *end)? {
                writeln!(out, "{range}")?;
            }
            out.flush()?;
        }

        Command::Dedup { coordinates_only } => {
            let mut store = open_store(args, &[])?;
            let coordinates_only = *coordinates_only;
            store.apply_pass_all(|records| Ok(remove_duplicates(records, coordinates_only)))?;
            store.flush()?;
        }

        Command::Merge { query_only } => {
            let mut store = open_store(args, &[])?;
            let test = if *query_only {
                OverlapTest::QueryOnly
            } else {
                OverlapTest::QueryAndSubject
            };
            store.apply_pass_all(|records| Ok(merge_within_chains(records, test)))?;
            store.flush()?;
        }

        Command::FilterLength { min_length } => {
            let mut store = open_store(args, &[])?;
            let min_length = *min_length;
            store.apply_pass_all(|records| Ok(filter_chains_by_length(records, min_length)))?;
            store.flush()?;
        }

        Command::Split { anchors, input } => {
            let anchors = read_records(anchors, None)
                .with_context(|| format!("Failed to read anchors {}", anchors.display()))?;
            let records = read_records(input, args.kind)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let runs = split_by_anchor(&sorted_for_split(anchors), &sorted_for_split(records));

            let mut out = stdout();
            for (i, run) in runs.iter().enumerate() {
                if i > 0 {
                    writeln!(out)?;
                }
                write_records(&mut out, run)?;
            }
            out.flush()?;
        }

        Command::Verify => {
            let store = open_store(args, &[])?;
            store.verify_index()?;
            store.verify_replay()?;
            let view = ChainView::build(&store)?;
            writeln!(stdout(), "ok\t{} records\t{} chains", store.len(), view.len())?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    // Set up rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    run(&args)
}

use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use histree::header::TreeHeader;
use histree::io::read_header_at;
use histree::{BasicInterval, HistoryTree, HtInterval, NodeType, TimeRangeCondition, TreeConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "histree-cli", version, about = "History tree tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the file header.
    Inspect {
        path: PathBuf,
        #[arg(long = "json")]
        json: bool,
    },
    /// List every node of a finished tree.
    Nodes {
        path: PathBuf,
        #[arg(long = "provider-version", default_value_t = 0)]
        provider_version: i32,
        #[arg(long = "verify")]
        verify: bool,
    },
    /// Print the intervals overlapping a time or time range.
    Query {
        path: PathBuf,
        #[arg(long = "provider-version", default_value_t = 0)]
        provider_version: i32,
        #[arg(long = "at", conflicts_with_all = ["from", "to"])]
        at: Option<i64>,
        #[arg(long = "from", requires = "to")]
        from: Option<i64>,
        #[arg(long = "to", requires = "from")]
        to: Option<i64>,
        #[arg(long = "limit")]
        limit: Option<usize>,
        #[arg(long = "json")]
        json: bool,
    },
    /// Build a synthetic tree and time insertion and queries.
    Bench {
        path: PathBuf,
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "intervals", default_value_t = 100_000)]
        intervals: u64,
        #[arg(long = "payload-bytes", default_value_t = 16)]
        payload_bytes: usize,
        #[arg(long = "duration", default_value_t = 1_000)]
        duration: i64,
        #[arg(long = "keep")]
        keep: bool,
    },
}

#[derive(Serialize)]
struct HeaderReport {
    path: String,
    file_version: u32,
    provider_version: i32,
    block_size: u32,
    max_children: u32,
    node_count: u32,
    tree_start: i64,
    root_seq: Option<i32>,
}

impl HeaderReport {
    fn new(path: &Path, header: &TreeHeader) -> Self {
        Self {
            path: path.display().to_string(),
            file_version: header.file_version,
            provider_version: header.provider_version,
            block_size: header.block_size,
            max_children: header.max_children,
            node_count: header.node_count,
            tree_start: header.tree_start,
            root_seq: header.is_finalized().then_some(header.root_seq),
        }
    }
}

#[derive(Serialize)]
struct IntervalRecord {
    start: i64,
    end: i64,
    payload: String,
}

impl From<&BasicInterval> for IntervalRecord {
    fn from(interval: &BasicInterval) -> Self {
        Self {
            start: interval.start(),
            end: interval.end(),
            payload: String::from_utf8_lossy(interval.payload()).into_owned(),
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Inspect { path, json } => cmd_inspect(&path, json, &mut out)?,
        Commands::Nodes {
            path,
            provider_version,
            verify,
        } => cmd_nodes(&path, provider_version, verify, &mut out)?,
        Commands::Query {
            path,
            provider_version,
            at,
            from,
            to,
            limit,
            json,
        } => {
            let condition = match (at, from, to) {
                (Some(t), _, _) => TimeRangeCondition::singleton(t),
                (None, Some(from), Some(to)) => TimeRangeCondition::range(from, to),
                _ => TimeRangeCondition::all(),
            };
            cmd_query(&path, provider_version, &condition, limit, json, &mut out)?;
        }
        Commands::Bench {
            path,
            config,
            intervals,
            payload_bytes,
            duration,
            keep,
        } => {
            let config = match config {
                Some(config) => TreeConfig::from_json_file(config)?,
                None => TreeConfig::default(),
            };
            cmd_bench(&path, config, intervals, payload_bytes, duration, keep, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn cmd_inspect(path: &Path, json: bool, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
    let header = read_header_at(path)?;
    let report = HeaderReport::new(path, &header);
    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "tree={}", report.path)?;
    writeln!(
        out,
        "file_version={} provider_version={}",
        report.file_version, report.provider_version
    )?;
    writeln!(
        out,
        "block_size={} max_children={} node_count={}",
        report.block_size, report.max_children, report.node_count
    )?;
    writeln!(out, "tree_start={}", report.tree_start)?;
    match report.root_seq {
        Some(root) => writeln!(out, "root_seq={root}")?,
        None => writeln!(out, "root_seq=unset (unfinished)")?,
    }
    Ok(())
}

fn cmd_nodes(
    path: &Path,
    provider_version: i32,
    verify: bool,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    let tree = HistoryTree::<BasicInterval>::open(path, provider_version)?;
    write!(out, "{tree}")?;
    let mut leaves = 0u32;
    for seq in 0..tree.node_count() {
        let node = tree.read_node(seq)?;
        if node.node_type() == NodeType::Leaf {
            leaves += 1;
        }
        writeln!(out, "{node}")?;
    }
    writeln!(
        out,
        "nodes={} leaves={} file_size={}",
        tree.node_count(),
        leaves,
        tree.file_size()?
    )?;
    if verify {
        tree.verify_integrity()?;
        writeln!(out, "integrity=ok")?;
    }
    Ok(())
}

fn cmd_query(
    path: &Path,
    provider_version: i32,
    condition: &TimeRangeCondition,
    limit: Option<usize>,
    json: bool,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    let tree = HistoryTree::<BasicInterval>::open(path, provider_version)?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut count = 0usize;
    for interval in tree.query(condition).take(limit) {
        let interval = interval?;
        if json {
            serde_json::to_writer(&mut *out, &IntervalRecord::from(&interval))?;
            writeln!(out)?;
        } else {
            writeln!(out, "{interval:?}")?;
        }
        count += 1;
    }
    if !json {
        writeln!(out, "matched={count} condition={condition}")?;
    }
    Ok(())
}

fn cmd_bench(
    path: &Path,
    config: TreeConfig,
    intervals: u64,
    payload_bytes: usize,
    duration: i64,
    keep: bool,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    let tree_start = config.tree_start;
    let tree = HistoryTree::<BasicInterval>::create(path, config)?;
    let payload = vec![0x5Au8; payload_bytes];

    let started = Instant::now();
    for i in 0..intervals as i64 {
        let start = tree_start + i;
        tree.insert(BasicInterval::new(start, start + duration, payload.clone())?)?;
    }
    tree.close_tree(tree.tree_end())?;
    let insert_elapsed = started.elapsed();

    let probes = 1_000i64.min(intervals as i64).max(1);
    let step = (intervals as i64 / probes).max(1);
    let started = Instant::now();
    let mut hits = 0usize;
    for p in 0..probes {
        let t = tree_start + p * step;
        for interval in tree.query(&TimeRangeCondition::singleton(t)) {
            interval?;
            hits += 1;
        }
    }
    let query_elapsed = started.elapsed();

    writeln!(
        out,
        "intervals={} nodes={} depth={} file_size={}",
        intervals,
        tree.node_count(),
        tree.depth(),
        tree.file_size()?
    )?;
    let secs = insert_elapsed.as_secs_f64().max(1e-9);
    writeln!(
        out,
        "insert_elapsed_ms={} insert_rate={:.0}/s",
        insert_elapsed.as_millis(),
        intervals as f64 / secs
    )?;
    writeln!(
        out,
        "queries={} hits={} avg_query_us={:.1}",
        probes,
        hits,
        query_elapsed.as_secs_f64() * 1e6 / probes as f64
    )?;

    if !keep {
        tree.delete_file()?;
    }
    Ok(())
}

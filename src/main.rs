use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use dotenvy::dotenv;
use snapshot_sink::store::{SnapshotStore, Table};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Trades,
    Exposures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Fixed-stride records as written by the terminal
    Binary,
    /// Legacy comma-separated rows
    Text,
}

#[derive(Debug, Parser)]
#[command(version, about = "Persist terminal trade/exposure snapshots into SQLite")]
struct Args {
    /// SQLite database file
    #[arg(long, env = "SNAPSHOT_DB", default_value = "snapshots.db")]
    db: PathBuf,

    /// Record type carried by the input batches
    #[arg(long, env = "SNAPSHOT_KIND", value_enum, default_value_t = Kind::Trades)]
    kind: Kind,

    /// Encoding of the input batches
    #[arg(long, env = "SNAPSHOT_FORMAT", value_enum, default_value_t = Format::Binary)]
    format: Format,

    /// Replace the whole exposure table with each batch instead of upserting
    #[arg(long, default_value_t = false)]
    replace: bool,

    /// Skip schema creation (schema managed elsewhere)
    #[arg(long, default_value_t = false)]
    no_schema: bool,

    /// Poll this directory and ingest every file that lands in it; `*.tmp`
    /// and dot files are left alone until renamed
    #[arg(long, env = "SNAPSHOT_WATCH")]
    watch: Option<PathBuf>,

    /// Poll interval for --watch, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Where --watch moves handled files; defaults to <watch>/processed
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Batch files to ingest, one transaction per file
    inputs: Vec<PathBuf>,
}

/// One file's worth of records, headed for the writer thread.
struct Batch {
    source: PathBuf,
    payload: Vec<u8>,
}

/// Result of one batch, sent back to the poll loop.
struct Done {
    source: PathBuf,
    ok: bool,
}

#[derive(Debug, Default)]
struct WriterStats {
    batches: usize,
    rows: usize,
    failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Mode {
    kind: Kind,
    format: Format,
    replace: bool,
}

fn ingest(store: &mut SnapshotStore, mode: Mode, payload: &[u8]) -> snapshot_sink::Result<usize> {
    match (mode.kind, mode.format) {
        (Kind::Trades, Format::Binary) => store.upsert_trades_binary(payload),
        (Kind::Trades, Format::Text) => store.upsert_trades_text(&String::from_utf8_lossy(payload)),
        (Kind::Exposures, Format::Binary) if mode.replace => store.replace_exposures_binary(payload),
        (Kind::Exposures, Format::Binary) => store.upsert_exposures_binary(payload),
        (Kind::Exposures, Format::Text) if mode.replace => {
            store.replace_exposures_text(&String::from_utf8_lossy(payload))
        }
        (Kind::Exposures, Format::Text) => store.upsert_exposures_text(&String::from_utf8_lossy(payload)),
    }
}

/// Owns the store; the channel is what serializes batches onto the handle.
fn writer_thread(
    mut store: SnapshotStore,
    mode: Mode,
    rx: Receiver<Batch>,
    done: Option<Sender<Done>>,
) -> WriterStats {
    let mut stats = WriterStats::default();
    for batch in rx {
        stats.batches += 1;
        let ok = match ingest(&mut store, mode, &batch.payload) {
            Ok(rows) => {
                stats.rows += rows;
                info!(source = %batch.source.display(), rows, "batch stored");
                true
            }
            Err(e) => {
                stats.failed += 1;
                error!(source = %batch.source.display(), error = %e, "batch rejected");
                false
            }
        };
        if let Some(done) = &done {
            let _ = done.send(Done { source: batch.source, ok });
        }
    }
    if let Err(e) = store.close() {
        warn!(error = %e, "closing store");
    }
    stats
}

fn today_dir(root: &Path) -> PathBuf {
    let fmt = time::macros::format_description!("[year]_[month]_[day]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let day = now.format(fmt).unwrap_or_else(|_| "undated".to_string());
    root.join(day)
}

fn archive_file(src: &Path, archive: &Path, ok: bool) -> Result<()> {
    let base = if ok { archive.to_path_buf() } else { archive.join("rejected") };
    let dir = today_dir(&base);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let name = src.file_name().context("source has no file name")?;
    fs::rename(src, dir.join(name)).with_context(|| format!("move {}", src.display()))?;
    Ok(())
}

/// Producers write under a temporary name and rename when done.
fn is_partial(path: &Path) -> bool {
    let hidden = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'));
    hidden || path.extension().is_some_and(|e| e == "tmp")
}

fn pending_files(dir: &Path, skip: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && !is_partial(&path) && !skip.contains(&path) {
            files.push(path);
        }
    }
    // file names carry the terminal's timestamp, so name order is arrival order
    files.sort();
    Ok(files)
}

/// Holds back files until their size is the same on two consecutive ticks,
/// so a batch still being written is never read half way.
#[derive(Debug, Default)]
struct Settling {
    sizes: HashMap<PathBuf, u64>,
}

impl Settling {
    fn ready(&mut self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut seen = HashMap::with_capacity(files.len());
        let mut ready = Vec::new();
        for path in files {
            let Ok(len) = fs::metadata(&path).map(|m| m.len()) else { continue };
            if self.sizes.get(&path) == Some(&len) {
                ready.push(path);
            } else {
                seen.insert(path, len);
            }
        }
        // files that vanished or were handed out are forgotten
        self.sizes = seen;
        ready
    }
}

fn watch_loop(dir: &Path, archive: &Path, interval_ms: u64, tx: Sender<Batch>, done_rx: Receiver<Done>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst)).context("install Ctrl+C handler")?;

    let interval = Duration::from_millis(interval_ms);
    let mut in_flight: HashSet<PathBuf> = HashSet::new();
    let mut settling = Settling::default();
    info!(dir = %dir.display(), every_ms = interval_ms, "watching for batches");
    while !stop.load(Ordering::SeqCst) {
        for d in done_rx.try_iter() {
            in_flight.remove(&d.source);
            if let Err(e) = archive_file(&d.source, archive, d.ok) {
                warn!(error = %e, "archiving batch file");
            }
        }
        for path in settling.ready(pending_files(dir, &in_flight)?) {
            let payload = match fs::read(&path) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "read failed");
                    continue;
                }
            };
            in_flight.insert(path.clone());
            tx.send(Batch { source: path, payload }).context("writer thread gone")?;
        }
        std::thread::sleep(interval);
    }
    info!("stopping");
    drop(tx);
    // archive whatever finished after the last tick
    for d in done_rx.iter() {
        if let Err(e) = archive_file(&d.source, archive, d.ok) {
            warn!(error = %e, "archiving batch file");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snapshot_sink=info")))
        .init();
    let args = Args::parse();

    if args.replace && args.kind != Kind::Exposures {
        bail!("--replace only applies to --kind exposures");
    }
    if args.watch.is_none() && args.inputs.is_empty() {
        bail!("nothing to do: pass input files or --watch <dir>");
    }

    let store = SnapshotStore::open(&args.db).with_context(|| format!("open {}", args.db.display()))?;
    if !args.no_schema {
        store.create_schema().context("create schema")?;
    }
    let mode = Mode { kind: args.kind, format: args.format, replace: args.replace };

    let (tx, rx) = bounded::<Batch>(64);
    let (done_tx, done_rx) = unbounded::<Done>();
    let notify = args.watch.is_some().then_some(done_tx);
    let writer = std::thread::spawn(move || writer_thread(store, mode, rx, notify));

    if let Some(dir) = &args.watch {
        let archive = args.archive.clone().unwrap_or_else(|| dir.join("processed"));
        watch_loop(dir, &archive, args.interval_ms, tx, done_rx)?;
    } else {
        for path in &args.inputs {
            let payload = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            tx.send(Batch { source: path.clone(), payload }).context("writer thread gone")?;
        }
        drop(tx);
    }

    let stats = match writer.join() {
        Ok(s) => s,
        Err(_) => bail!("writer thread panicked"),
    };
    eprintln!(
        "Stored {} rows from {} batches ({} rejected).",
        stats.rows, stats.batches, stats.failed
    );
    if let Ok(store) = SnapshotStore::open(&args.db) {
        if let (Ok(t), Ok(e)) = (store.count(Table::Trades), store.count(Table::Exposures)) {
            eprintln!("Database now holds {t} trades and {e} exposure rows.");
        }
    }
    if stats.failed > 0 {
        bail!("{} batch(es) rejected", stats.failed);
    }
    Ok(())
}

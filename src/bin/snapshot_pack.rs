use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use snapshot_sink::layout::encode;
use snapshot_sink::text::{parse_exposures, parse_trades};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Trades,
    Exposures,
}

#[derive(Debug, Parser)]
#[command(about = "Convert a legacy comma-separated export into fixed-stride binary records")]
struct Args {
    /// Record type of the rows in the input
    #[arg(long, value_enum)]
    kind: Kind,

    /// Text file to read
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Binary file to write
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Fail instead of writing an empty file when no row parses
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let raw = fs::read(&args.input).with_context(|| format!("open {:?}", args.input))?;
    let text = String::from_utf8_lossy(&raw);
    let lines = text.lines().filter(|l| !l.trim().is_empty()).count();

    let (records, bytes) = match args.kind {
        Kind::Trades => {
            let recs = parse_trades(&text);
            (recs.len(), encode(&recs))
        }
        Kind::Exposures => {
            let recs = parse_exposures(&text);
            (recs.len(), encode(&recs))
        }
    };
    if records == 0 && args.strict {
        bail!("no parsable rows in {:?}", args.input);
    }
    fs::write(&args.output, &bytes).with_context(|| format!("write {:?}", args.output))?;
    eprintln!(
        "Packed {} of {} rows into {} bytes ({} skipped).",
        records,
        lines,
        bytes.len(),
        lines.saturating_sub(records)
    );
    Ok(())
}

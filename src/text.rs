//! Legacy comma-separated ingestion.
//!
//! Older terminal scripts emit one record per line with fields in layout
//! order. Rows that do not yield the required fields are skipped without
//! error: those producers write the occasional short row on purpose and a
//! bad line must not cost the rest of the batch. There is no count of
//! skipped rows beyond a `trace!` event per row.
//!
//! Trade row: `account,ticket,symbol,type,lots,open_price,stop_loss,take_profit,profit,open_time[,close_time]`
//!
//! Exposure row: `snapshot_time,currency,amount,rate_to_usd,usd_value`
use crate::record::{ExposureSnapshot, TradeSnapshot};
use tracing::trace;

/// Required leading fields of a trade row; `close_time` is optional.
pub const TRADE_MIN_FIELDS: usize = 10;
pub const EXPOSURE_FIELDS: usize = 5;

/// Non-blank lines with any trailing `\r` removed, numbered from 1.
fn rows(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split('\n')
        .enumerate()
        .map(|(i, l)| (i + 1, l.strip_suffix('\r').unwrap_or(l)))
        .filter(|(_, l)| !l.trim().is_empty())
}

fn text_field(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn int_field(s: &str) -> Option<i32> {
    s.trim().parse().ok()
}

fn float_field(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

fn parse_trade_row(line: &str) -> Option<TradeSnapshot> {
    // the 11th piece keeps any further commas: close_time runs to end of line
    let mut it = line.splitn(TRADE_MIN_FIELDS + 1, ',');
    let account = int_field(it.next()?)?;
    let ticket = int_field(it.next()?)?;
    let symbol = text_field(it.next()?)?;
    let side = text_field(it.next()?)?;
    let lots = float_field(it.next()?)?;
    let open_price = float_field(it.next()?)?;
    let stop_loss = float_field(it.next()?)?;
    let take_profit = float_field(it.next()?)?;
    let profit = float_field(it.next()?)?;
    let open_time = text_field(it.next()?)?;
    let close_time = it.next();
    Some(TradeSnapshot::new(
        account, ticket, symbol, side, lots, open_price, stop_loss, take_profit, profit, open_time, close_time,
    ))
}

fn parse_exposure_row(line: &str) -> Option<ExposureSnapshot> {
    let mut it = line.split(',');
    let snapshot_time = text_field(it.next()?)?;
    let currency = text_field(it.next()?)?;
    let amount = float_field(it.next()?)?;
    let rate_to_usd = float_field(it.next()?)?;
    let usd_value = float_field(it.next()?)?;
    Some(ExposureSnapshot::new(snapshot_time, currency, amount, rate_to_usd, usd_value))
}

fn parse_rows<T>(text: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    let mut out = Vec::new();
    for (line_no, line) in rows(text) {
        match parse(line) {
            Some(rec) => out.push(rec),
            None => trace!(line_no, kind, "skipping short or malformed row"),
        }
    }
    out
}

/// Parse every well-formed trade row. Malformed rows are dropped.
pub fn parse_trades(text: &str) -> Vec<TradeSnapshot> {
    parse_rows(text, "trade", parse_trade_row)
}

/// Parse every well-formed exposure row. Malformed rows are dropped.
pub fn parse_exposures(text: &str) -> Vec<ExposureSnapshot> {
    parse_rows(text, "exposure", parse_exposure_row)
}

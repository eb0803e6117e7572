//! Storage handle and the batch entry points built on it.
//!
//! `SnapshotStore` owns one SQLite connection. Each public write method is
//! one batch in one transaction; methods take `&mut self`, so the handle
//! processes a single batch at a time. Sharing a store between threads
//! means wrapping it in a mutex or giving it to one writer thread, as the
//! `snapshot_sink` binary does.
use crate::error::Result;
use crate::layout::{decode, FixedRecord};
use crate::record::{ExposureSnapshot, TradeSnapshot};
use crate::text::{parse_exposures, parse_trades};
use crate::txn::{BatchState, Coordinator};
use crate::upsert::{clear_exposures, upsert_all, Upsert, EXPOSURE_TABLE};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

/// Idempotent DDL for both tables.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS trades (
    account       INTEGER NOT NULL,
    ticket        INTEGER PRIMARY KEY,
    symbol        TEXT    NOT NULL,
    type          TEXT    NOT NULL,
    lots          REAL    NOT NULL,
    open_price    REAL    NOT NULL,
    stop_loss     REAL    NOT NULL,
    take_profit   REAL    NOT NULL,
    profit        REAL    NOT NULL,
    open_time     TEXT    NOT NULL,
    close_time    TEXT
);
CREATE TABLE IF NOT EXISTS exposure_log (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_time  TEXT    NOT NULL,
    currency       TEXT    NOT NULL,
    amount         REAL    NOT NULL,
    rate_to_usd    REAL    NOT NULL,
    usd_value      REAL    NOT NULL,
    UNIQUE(currency)
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Trades,
    Exposures,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Trades => "trades",
            Table::Exposures => "exposure_log",
        }
    }
}

pub struct SnapshotStore {
    conn: Connection,
    coordinator: Coordinator,
}

impl SnapshotStore {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened snapshot store");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap a connection whose schema is managed elsewhere.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn, coordinator: Coordinator::new() }
    }

    /// Close the handle, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }

    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        info!("schema ready");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Outcome of the most recent batch call. `Idle` when that call was
    /// rejected before its transaction opened (bad layout, failed begin).
    pub fn last_batch(&self) -> BatchState {
        self.coordinator.state()
    }

    fn apply<R: Upsert>(&mut self, records: &[R]) -> Result<usize> {
        let n = self.coordinator.run(&mut self.conn, R::TABLE, |tx| upsert_all(tx, records))?;
        debug!(table = R::TABLE, rows = n, "batch applied");
        Ok(n)
    }

    pub fn apply_trades(&mut self, records: &[TradeSnapshot]) -> Result<usize> {
        self.apply(records)
    }

    pub fn apply_exposures(&mut self, records: &[ExposureSnapshot]) -> Result<usize> {
        self.apply(records)
    }

    /// Replace the whole exposure table with `records` in one transaction.
    pub fn replace_exposures(&mut self, records: &[ExposureSnapshot]) -> Result<usize> {
        let n = self.coordinator.run(&mut self.conn, EXPOSURE_TABLE, |tx| {
            let cleared = clear_exposures(tx)?;
            debug!(rows = cleared, "cleared exposures");
            upsert_all(tx, records)
        })?;
        debug!(table = EXPOSURE_TABLE, rows = n, "snapshot replaced");
        Ok(n)
    }

    /// Delete every exposure row. Returns the number removed.
    pub fn clear_exposures(&mut self) -> Result<usize> {
        self.coordinator.run(&mut self.conn, EXPOSURE_TABLE, clear_exposures)
    }

    fn decode_batch<R: FixedRecord>(&mut self, bytes: &[u8]) -> Result<Vec<R>> {
        decode(bytes, R::STRIDE).map_err(|e| {
            self.coordinator.reset();
            e.into()
        })
    }

    pub fn upsert_trades_binary(&mut self, bytes: &[u8]) -> Result<usize> {
        let records: Vec<TradeSnapshot> = self.decode_batch(bytes)?;
        self.apply(&records)
    }

    pub fn upsert_exposures_binary(&mut self, bytes: &[u8]) -> Result<usize> {
        let records: Vec<ExposureSnapshot> = self.decode_batch(bytes)?;
        self.apply(&records)
    }

    pub fn replace_exposures_binary(&mut self, bytes: &[u8]) -> Result<usize> {
        let records: Vec<ExposureSnapshot> = self.decode_batch(bytes)?;
        self.replace_exposures(&records)
    }

    /// Legacy text batch. Malformed rows are dropped, the rest is one batch.
    pub fn upsert_trades_text(&mut self, text: &str) -> Result<usize> {
        self.apply(&parse_trades(text))
    }

    pub fn upsert_exposures_text(&mut self, text: &str) -> Result<usize> {
        self.apply(&parse_exposures(text))
    }

    pub fn replace_exposures_text(&mut self, text: &str) -> Result<usize> {
        self.replace_exposures(&parse_exposures(text))
    }

    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    pub fn trade(&self, ticket: i32) -> Result<Option<TradeSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT account, ticket, symbol, type, lots, open_price, stop_loss, take_profit, profit, \
                 open_time, close_time FROM trades WHERE ticket = ?1",
                [ticket],
                trade_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Current exposure rows ordered by currency.
    pub fn exposures(&self) -> Result<Vec<ExposureSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_time, currency, amount, rate_to_usd, usd_value FROM exposure_log ORDER BY currency",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let snapshot_time: String = r.get(0)?;
                let currency: String = r.get(1)?;
                Ok(ExposureSnapshot::new(&snapshot_time, &currency, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn trade_from_row(r: &Row<'_>) -> rusqlite::Result<TradeSnapshot> {
    let symbol: String = r.get(2)?;
    let side: String = r.get(3)?;
    let open_time: String = r.get(9)?;
    let close_time: Option<String> = r.get(10)?;
    Ok(TradeSnapshot::new(
        r.get(0)?,
        r.get(1)?,
        &symbol,
        &side,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
        &open_time,
        close_time.as_deref(),
    ))
}

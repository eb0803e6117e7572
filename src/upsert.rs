//! Insert-or-update of snapshot records keyed by natural identity.
//!
//! Each record is written with `INSERT .. ON CONFLICT(key) DO UPDATE`, so
//! a repeated key overwrites every other column with the newer values.
//! Records are applied in the order given; within one batch the last
//! record for a key wins. Uniqueness itself is the schema's job.
use crate::error::{IngestError, Result};
use crate::record::{ExposureSnapshot, TradeSnapshot};
use crate::txn::Coordinator;
use rusqlite::{params, Connection, Statement};

pub const TRADES_TABLE: &str = "trades";
pub const EXPOSURE_TABLE: &str = "exposure_log";

const UPSERT_TRADE_SQL: &str = "\
INSERT INTO trades \
(account, ticket, symbol, type, lots, open_price, stop_loss, take_profit, profit, open_time, close_time) \
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
ON CONFLICT(ticket) DO UPDATE SET \
account = excluded.account, \
symbol = excluded.symbol, \
type = excluded.type, \
lots = excluded.lots, \
open_price = excluded.open_price, \
stop_loss = excluded.stop_loss, \
take_profit = excluded.take_profit, \
profit = excluded.profit, \
open_time = excluded.open_time, \
close_time = excluded.close_time";

const UPSERT_EXPOSURE_SQL: &str = "\
INSERT INTO exposure_log \
(snapshot_time, currency, amount, rate_to_usd, usd_value) \
VALUES (?1, ?2, ?3, ?4, ?5) \
ON CONFLICT(currency) DO UPDATE SET \
snapshot_time = excluded.snapshot_time, \
amount = excluded.amount, \
rate_to_usd = excluded.rate_to_usd, \
usd_value = excluded.usd_value";

/// A record type with a table and an upsert statement.
pub trait Upsert {
    const TABLE: &'static str;
    const SQL: &'static str;

    /// Bind this record to the prepared upsert and step it once.
    fn execute(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize>;
}

impl Upsert for TradeSnapshot {
    const TABLE: &'static str = TRADES_TABLE;
    const SQL: &'static str = UPSERT_TRADE_SQL;

    fn execute(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.account,
            self.ticket,
            self.symbol.as_str(),
            self.side.as_str(),
            self.lots,
            self.open_price,
            self.stop_loss,
            self.take_profit,
            self.profit,
            self.open_time.as_str(),
            self.stored_close_time(),
        ])
    }
}

impl Upsert for ExposureSnapshot {
    const TABLE: &'static str = EXPOSURE_TABLE;
    const SQL: &'static str = UPSERT_EXPOSURE_SQL;

    fn execute(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.snapshot_time.as_str(),
            self.currency.as_str(),
            self.amount,
            self.rate_to_usd,
            self.usd_value,
        ])
    }
}

/// Upsert `records` on `conn`, stopping at the first failure. Must run
/// inside a transaction for the batch to be atomic; see [`apply`].
pub fn upsert_all<R: Upsert>(conn: &Connection, records: &[R]) -> Result<usize> {
    let mut stmt = conn
        .prepare(R::SQL)
        .map_err(|source| IngestError::PrepareFailure { table: R::TABLE, source })?;
    for (index, record) in records.iter().enumerate() {
        record
            .execute(&mut stmt)
            .map_err(|source| IngestError::ApplyFailure { table: R::TABLE, index, source })?;
    }
    Ok(records.len())
}

/// Remove every exposure row. Returns the number of rows deleted.
pub fn clear_exposures(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM exposure_log", [])?)
}

/// Apply a whole batch atomically on a handle.
pub fn apply<R: Upsert>(conn: &mut Connection, records: &[R]) -> Result<usize> {
    Coordinator::new().run(conn, R::TABLE, |tx| upsert_all(tx, records))
}

/// Clear the exposure table in its own transaction.
pub fn replace_all(conn: &mut Connection) -> Result<usize> {
    Coordinator::new().run(conn, EXPOSURE_TABLE, clear_exposures)
}

/// Clear the exposure table and load a complete snapshot as one batch.
pub fn replace_exposures(conn: &mut Connection, records: &[ExposureSnapshot]) -> Result<usize> {
    Coordinator::new().run(conn, EXPOSURE_TABLE, |tx| {
        clear_exposures(tx)?;
        upsert_all(tx, records)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SCHEMA_SQL;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(SCHEMA_SQL).unwrap();
        c
    }

    fn trade(ticket: i32, profit: f64, close: Option<&str>) -> TradeSnapshot {
        TradeSnapshot::new(1, ticket, "EURUSD", "BUY", 1.0, 1.1, 1.09, 1.11, profit, "2024-01-01T00:00:00", close)
    }

    fn profit_of(c: &Connection, ticket: i32) -> f64 {
        c.query_row("SELECT profit FROM trades WHERE ticket = ?1", [ticket], |r| r.get(0)).unwrap()
    }

    fn close_of(c: &Connection, ticket: i32) -> Option<String> {
        c.query_row("SELECT close_time FROM trades WHERE ticket = ?1", [ticket], |r| r.get(0)).unwrap()
    }

    fn rows(c: &Connection, table: &str) -> i64 {
        c.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn same_ticket_twice_is_one_row() {
        let mut c = conn();
        apply(&mut c, &[trade(100, 5.0, None)]).unwrap();
        apply(&mut c, &[trade(100, 5.0, None)]).unwrap();
        assert_eq!(rows(&c, "trades"), 1);
        assert_eq!(profit_of(&c, 100), 5.0);
    }

    #[test]
    fn later_record_in_batch_wins() {
        let mut c = conn();
        let n = apply(&mut c, &[trade(100, 5.0, None), trade(100, -2.5, None)]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(rows(&c, "trades"), 1);
        assert_eq!(profit_of(&c, 100), -2.5);
    }

    #[test]
    fn close_time_null_convention() {
        let mut c = conn();
        apply(&mut c, &[trade(7, 0.0, None)]).unwrap();
        assert_eq!(close_of(&c, 7), None);
        apply(&mut c, &[trade(7, 0.0, Some("2024-01-02T00:00:00"))]).unwrap();
        assert_eq!(close_of(&c, 7).as_deref(), Some("2024-01-02T00:00:00"));
        apply(&mut c, &[trade(7, 0.0, Some(""))]).unwrap();
        assert_eq!(close_of(&c, 7), None);
    }

    #[test]
    fn missing_table_is_prepare_failure() {
        let mut c = Connection::open_in_memory().unwrap();
        let err = apply(&mut c, &[trade(1, 0.0, None)]).unwrap_err();
        assert!(matches!(err, IngestError::PrepareFailure { table: "trades", .. }));
    }

    #[test]
    fn failing_record_rolls_back_batch() {
        let mut c = conn();
        c.execute_batch(
            "CREATE TRIGGER reject_666 BEFORE INSERT ON trades WHEN NEW.ticket = 666 \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        let batch = [trade(1, 0.0, None), trade(666, 0.0, None), trade(3, 0.0, None)];
        let err = apply(&mut c, &batch).unwrap_err();
        assert!(matches!(err, IngestError::ApplyFailure { table: "trades", index: 1, .. }));
        assert_eq!(rows(&c, "trades"), 0);
    }

    #[test]
    fn exposure_upsert_by_currency() {
        let mut c = conn();
        apply(&mut c, &[ExposureSnapshot::new("t1", "USD", 10.0, 1.0, 10.0)]).unwrap();
        apply(&mut c, &[ExposureSnapshot::new("t2", "USD", 20.0, 1.0, 20.0)]).unwrap();
        assert_eq!(rows(&c, "exposure_log"), 1);
        let (t, amount): (String, f64) = c
            .query_row("SELECT snapshot_time, amount FROM exposure_log WHERE currency = 'USD'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((t.as_str(), amount), ("t2", 20.0));
    }

    #[test]
    fn replace_leaves_exactly_the_new_snapshot() {
        let mut c = conn();
        apply(
            &mut c,
            &[
                ExposureSnapshot::new("t0", "CHF", 1.0, 1.1, 1.1),
                ExposureSnapshot::new("t0", "USD", 1.0, 1.0, 1.0),
            ],
        )
        .unwrap();
        let snapshot = [
            ExposureSnapshot::new("t1", "USD", 5.0, 1.0, 5.0),
            ExposureSnapshot::new("t1", "EUR", 5.0, 1.1, 5.5),
            ExposureSnapshot::new("t1", "JPY", 500.0, 0.0067, 3.35),
        ];
        replace_exposures(&mut c, &snapshot).unwrap();
        assert_eq!(rows(&c, "exposure_log"), 3);
        let chf: i64 = c
            .query_row("SELECT COUNT(*) FROM exposure_log WHERE currency = 'CHF'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(chf, 0);
    }

    #[test]
    fn replace_all_then_apply() {
        let mut c = conn();
        apply(&mut c, &[ExposureSnapshot::new("t0", "GBP", 1.0, 1.2, 1.2)]).unwrap();
        assert_eq!(replace_all(&mut c).unwrap(), 1);
        assert_eq!(rows(&c, "exposure_log"), 0);
        apply(&mut c, &[ExposureSnapshot::new("t1", "USD", 5.0, 1.0, 5.0)]).unwrap();
        assert_eq!(rows(&c, "exposure_log"), 1);
    }

    #[test]
    fn failed_replace_keeps_previous_snapshot() {
        let mut c = conn();
        apply(&mut c, &[ExposureSnapshot::new("t0", "USD", 1.0, 1.0, 1.0)]).unwrap();
        c.execute_batch(
            "CREATE TRIGGER reject_xxx BEFORE INSERT ON exposure_log WHEN NEW.currency = 'XXX' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        let snapshot = [
            ExposureSnapshot::new("t1", "EUR", 5.0, 1.1, 5.5),
            ExposureSnapshot::new("t1", "XXX", 1.0, 1.0, 1.0),
        ];
        assert!(replace_exposures(&mut c, &snapshot).is_err());
        assert_eq!(rows(&c, "exposure_log"), 1);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let mut c = conn();
        assert_eq!(apply::<TradeSnapshot>(&mut c, &[]).unwrap(), 0);
        assert_eq!(rows(&c, "trades"), 0);
    }
}

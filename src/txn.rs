//! All-or-nothing batch execution.
//!
//! A batch runs inside one SQLite transaction. The transaction is a scoped
//! `rusqlite::Transaction`: it is committed only when the batch body
//! returns `Ok`, rolled back explicitly on `Err`, and rolled back by its
//! `Drop` on any other exit (including a panic in the body). There is no
//! nesting and no internal retry.
use crate::error::{IngestError, Result, TxStage};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error};

/// Where the coordinator is in its per-batch cycle.
///
/// `Idle -> InTransaction -> Committed | RolledBack`; a settled state is
/// ready for the next batch just like `Idle`. Every batch starts from
/// `Idle`, so a batch that never opened its transaction leaves `Idle`
/// behind rather than the previous outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    #[default]
    Idle,
    InTransaction,
    Committed,
    RolledBack,
}

impl BatchState {
    pub fn is_settled(self) -> bool {
        !matches!(self, BatchState::InTransaction)
    }
}

/// Runs one batch at a time against a connection it borrows mutably,
/// which is what keeps a second batch from starting on the same handle.
#[derive(Debug, Default)]
pub struct Coordinator {
    state: BatchState,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Record a batch that was turned away before reaching [`run`](Self::run).
    pub fn reset(&mut self) {
        self.state = BatchState::Idle;
    }

    /// Execute `body` in a single transaction. `label` only tags
    /// diagnostics.
    pub fn run<T, F>(&mut self, conn: &mut Connection, label: &str, body: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.state = BatchState::Idle;
        // IMMEDIATE takes the write lock up front so a batch never fails
        // half way through on lock upgrade
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| {
                error!(batch = label, error = %source, "begin failed");
                IngestError::TransactionFailure { stage: TxStage::Begin, source }
            })?;
        self.state = BatchState::InTransaction;

        match body(&tx) {
            Ok(value) => match tx.commit() {
                Ok(()) => {
                    self.state = BatchState::Committed;
                    debug!(batch = label, "committed");
                    Ok(value)
                }
                Err(source) => {
                    // the failed transaction rolls back when dropped
                    self.state = BatchState::RolledBack;
                    error!(batch = label, error = %source, "commit failed");
                    Err(IngestError::TransactionFailure { stage: TxStage::Commit, source })
                }
            },
            Err(err) => {
                error!(batch = label, error = %err, "batch aborted, rolling back");
                let rolled = tx.rollback();
                self.state = BatchState::RolledBack;
                match rolled {
                    Ok(()) => Err(err),
                    Err(source) => {
                        error!(batch = label, error = %source, "rollback failed");
                        Err(IngestError::TransactionFailure { stage: TxStage::Rollback, source })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LayoutError;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);").unwrap();
        c
    }

    fn count(c: &Connection) -> i64 {
        c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn commits_on_success() {
        let mut c = conn();
        let mut co = Coordinator::new();
        assert_eq!(co.state(), BatchState::Idle);
        let n = co
            .run(&mut c, "test", |tx| {
                tx.execute("INSERT INTO t VALUES (1)", [])?;
                tx.execute("INSERT INTO t VALUES (2)", [])?;
                Ok(2)
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(co.state(), BatchState::Committed);
        assert_eq!(count(&c), 2);
        assert!(c.is_autocommit());
    }

    #[test]
    fn rolls_back_everything_on_error() {
        let mut c = conn();
        let mut co = Coordinator::new();
        let res: Result<()> = co.run(&mut c, "test", |tx| {
            tx.execute("INSERT INTO t VALUES (1)", [])?;
            Err(IngestError::InvalidLayout(LayoutError::Empty))
        });
        assert!(matches!(res, Err(IngestError::InvalidLayout(_))));
        assert_eq!(co.state(), BatchState::RolledBack);
        assert!(co.state().is_settled());
        assert_eq!(count(&c), 0);
        assert!(c.is_autocommit());

        // the coordinator accepts the next batch
        co.run(&mut c, "test", |tx| {
            tx.execute("INSERT INTO t VALUES (3)", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&c), 1);
    }

    #[test]
    fn begin_inside_open_transaction_fails() {
        let mut c = conn();
        c.execute_batch("BEGIN").unwrap();
        let mut co = Coordinator::new();
        let res = co.run(&mut c, "test", |_| Ok(()));
        assert!(matches!(
            res,
            Err(IngestError::TransactionFailure { stage: TxStage::Begin, .. })
        ));
        assert_eq!(co.state(), BatchState::Idle);
    }

    #[test]
    fn begin_failure_clears_previous_outcome() {
        let mut c = conn();
        let mut co = Coordinator::new();
        co.run(&mut c, "test", |_| Ok(())).unwrap();
        assert_eq!(co.state(), BatchState::Committed);

        c.execute_batch("BEGIN").unwrap();
        assert!(co.run(&mut c, "test", |_| Ok(())).is_err());
        assert_eq!(co.state(), BatchState::Idle);
    }
}

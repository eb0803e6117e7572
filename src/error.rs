//! Error taxonomy for batch ingestion.
//!
//! Every engine operation returns [`IngestError`] through `Result`. The
//! underlying storage message is also written to the `tracing` channel at
//! the point a batch is abandoned, so callers that only look at success or
//! failure (the C ABI layer) still leave a trail for operators.
use std::fmt;
use thiserror::Error;

/// Why a byte buffer could not be partitioned into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Null or zero-length buffer.
    Empty,
    /// Caller-supplied stride differs from the record's fixed width.
    StrideMismatch { stride: usize, expected: usize },
    /// Buffer length is not a whole number of records.
    Remainder { len: usize, stride: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::Empty => write!(f, "empty buffer"),
            LayoutError::StrideMismatch { stride, expected } => {
                write!(f, "stride {stride} does not match record width {expected}")
            }
            LayoutError::Remainder { len, stride } => {
                write!(f, "{len} bytes is not a multiple of stride {stride} (remainder {})", len % stride)
            }
        }
    }
}

/// Transaction step that failed at the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStage::Begin => "begin",
            TxStage::Commit => "commit",
            TxStage::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid layout: {0}")]
    InvalidLayout(LayoutError),

    #[error("could not prepare write statement for `{table}`: {source}")]
    PrepareFailure {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("record #{index} failed to apply to `{table}`: {source}")]
    ApplyFailure {
        table: &'static str,
        index: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("transaction {stage} failed: {source}")]
    TransactionFailure {
        stage: TxStage,
        #[source]
        source: rusqlite::Error,
    },

    /// Handle lifecycle and schema errors (open, close, DDL, read-back).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<LayoutError> for IngestError {
    fn from(e: LayoutError) -> Self {
        IngestError::InvalidLayout(e)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

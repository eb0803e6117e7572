//! Snapshot sink for trading-terminal position and exposure data.
//!
//! The terminal hands over a batch of records on every tick or timer; this
//! crate stores them in SQLite with idempotent upserts, one transaction per
//! batch:
//!
//! - `record`: trade and exposure snapshot types with bounded text fields
//! - `layout`: fixed-stride binary decoding (and encoding) of record batches
//! - `text`: legacy comma-separated rows, with silent skip of bad rows
//! - `upsert`: insert-or-update per table and the full-replace operation
//! - `txn`: the transaction coordinator that makes a batch all-or-nothing
//! - `store`: the storage handle, schema, and batch entry points
//! - `ffi`: C ABI exports for loading the crate as a terminal DLL
//!
//! The binaries (`src/main.rs` and `src/bin/snapshot_pack.rs`) ingest batch
//! files into a database and convert legacy text exports to the binary
//! layout.
pub mod error;
pub mod layout;
pub mod record;
pub mod store;
pub mod text;
pub mod txn;
pub mod upsert;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use error::{IngestError, LayoutError, Result, TxStage};
pub use layout::{decode, encode, FixedRecord};
pub use record::{ExposureSnapshot, TradeSnapshot};
pub use store::SnapshotStore;
pub use text::{parse_exposures, parse_trades};
pub use upsert::{apply, replace_all, replace_exposures};

//! C ABI exports for loading the crate as a terminal-side DLL.
//!
//! Names and argument order follow the legacy DLL the terminal scripts
//! already import, so existing `#import` blocks keep working:
//!
//! - `openDatabase` / `closeDatabase` / `createTable`
//! - `upsertTradeBinary`, `insertExposureBinary`, `replaceExposureBinary`,
//!   `clearExposureLog`
//! - `upsertTradeBulk`, `insertTradeBulk`, `insertExposureBulk` (legacy text)
//! - `createTradeData` / `createExposureData` (fill one fixed-layout record)
//!
//! Entry points taking strings also come in a `W` flavour for UTF-16
//! (`PWideChar`) callers.
//!
//! Notes
//! - All exports use the "system" ABI (stdcall on 32-bit Windows).
//! - Every call returns `bool`; the cause of a `false` is written to the
//!   `tracing` subscriber (stderr), never returned.
//! - A panic is caught at the boundary and reported as `false`.
//!
//! # Safety
//!
//! Pointers must be null or valid for the stated length; strings must be
//! NUL-terminated; handles must come from `openDatabase*` and must not be
//! used by two threads at once.
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

use crate::error::Result;
use crate::layout::{encode, EXPOSURE_STRIDE, TRADE_STRIDE};
use crate::record::{ExposureSnapshot, TradeSnapshot};
use crate::store::SnapshotStore;
use once_cell::sync::OnceCell;
use std::borrow::Cow;
use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;
use tracing_subscriber::EnvFilter;
use widestring::U16CStr;

pub type PWideChar = *const u16;
pub type StoreHandle = *mut SnapshotStore;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install a stderr subscriber the first time any export is called. A host
/// that already installed one keeps it.
fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snapshot_sink=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn guarded<F: FnOnce() -> bool>(call: &'static str, f: F) -> bool {
    init_logging();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(ok) => ok,
        Err(_) => {
            error!(call, "panic caught at ffi boundary");
            false
        }
    }
}

fn report<T>(call: &'static str, r: Result<T>) -> bool {
    match r {
        Ok(_) => true,
        Err(e) => {
            error!(call, error = %e, "call failed");
            false
        }
    }
}

unsafe fn c_str<'a>(p: *const c_char) -> Option<Cow<'a, str>> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy())
}

unsafe fn w_str(p: PWideChar) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { U16CStr::from_ptr_str(p) }.to_string_lossy())
}

unsafe fn byte_slice<'a>(p: *const u8, len: usize) -> Option<&'a [u8]> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { std::slice::from_raw_parts(p, len) })
}

fn open_into(path: &str, out: *mut StoreHandle) -> bool {
    match SnapshotStore::open(path) {
        Ok(store) => {
            unsafe { *out = Box::into_raw(Box::new(store)) };
            true
        }
        Err(e) => {
            error!(path, error = %e, "open failed");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn openDatabase(path: *const c_char, out: *mut StoreHandle) -> bool {
    guarded("openDatabase", || {
        if out.is_null() {
            return false;
        }
        match unsafe { c_str(path) } {
            Some(p) => open_into(&p, out),
            None => false,
        }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn openDatabaseW(path: PWideChar, out: *mut StoreHandle) -> bool {
    guarded("openDatabaseW", || {
        if out.is_null() {
            return false;
        }
        match unsafe { w_str(path) } {
            Some(p) => open_into(&p, out),
            None => false,
        }
    })
}

/// Consumes the handle; it must not be used afterwards even on `false`.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn closeDatabase(db: StoreHandle) -> bool {
    guarded("closeDatabase", || {
        if db.is_null() {
            return false;
        }
        let store = unsafe { Box::from_raw(db) };
        report("closeDatabase", store.close())
    })
}

fn with_store<F>(call: &'static str, db: StoreHandle, f: F) -> bool
where
    F: FnOnce(&mut SnapshotStore) -> bool,
{
    guarded(call, || match unsafe { db.as_mut() } {
        Some(store) => f(store),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn createTable(db: StoreHandle) -> bool {
    with_store("createTable", db, |s| report("createTable", s.create_schema()))
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn upsertTradeBinary(db: StoreHandle, data: *const u8, size: usize) -> bool {
    with_store("upsertTradeBinary", db, |s| match unsafe { byte_slice(data, size) } {
        Some(bytes) => report("upsertTradeBinary", s.upsert_trades_binary(bytes)),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn insertExposureBinary(db: StoreHandle, data: *const u8, size: usize) -> bool {
    with_store("insertExposureBinary", db, |s| match unsafe { byte_slice(data, size) } {
        Some(bytes) => report("insertExposureBinary", s.upsert_exposures_binary(bytes)),
        None => false,
    })
}

/// Clear `exposure_log` and load the batch in one transaction.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn replaceExposureBinary(db: StoreHandle, data: *const u8, size: usize) -> bool {
    with_store("replaceExposureBinary", db, |s| match unsafe { byte_slice(data, size) } {
        Some(bytes) => report("replaceExposureBinary", s.replace_exposures_binary(bytes)),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn clearExposureLog(db: StoreHandle) -> bool {
    with_store("clearExposureLog", db, |s| report("clearExposureLog", s.clear_exposures()))
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn upsertTradeBulk(db: StoreHandle, csv: *const c_char) -> bool {
    with_store("upsertTradeBulk", db, |s| match unsafe { c_str(csv) } {
        Some(text) => report("upsertTradeBulk", s.upsert_trades_text(&text)),
        None => false,
    })
}

/// Same as `upsertTradeBulk`; kept for scripts importing the older name.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn insertTradeBulk(db: StoreHandle, csv: *const c_char) -> bool {
    unsafe { upsertTradeBulk(db, csv) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn insertExposureBulk(db: StoreHandle, csv: *const c_char) -> bool {
    with_store("insertExposureBulk", db, |s| match unsafe { c_str(csv) } {
        Some(text) => report("insertExposureBulk", s.upsert_exposures_text(&text)),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn upsertTradeBulkW(db: StoreHandle, csv: PWideChar) -> bool {
    with_store("upsertTradeBulkW", db, |s| match unsafe { w_str(csv) } {
        Some(text) => report("upsertTradeBulkW", s.upsert_trades_text(&text)),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn insertExposureBulkW(db: StoreHandle, csv: PWideChar) -> bool {
    with_store("insertExposureBulkW", db, |s| match unsafe { w_str(csv) } {
        Some(text) => report("insertExposureBulkW", s.upsert_exposures_text(&text)),
        None => false,
    })
}

/// Fill `out` (exactly 144 bytes) with one trade record. A null or empty
/// `close_time` leaves the slot empty, meaning "still open".
#[unsafe(no_mangle)]
pub unsafe extern "system" fn createTradeData(
    account: i32,
    ticket: i32,
    symbol: *const c_char,
    side: *const c_char,
    lots: f64,
    open_price: f64,
    stop_loss: f64,
    take_profit: f64,
    profit: f64,
    open_time: *const c_char,
    close_time: *const c_char,
    out: *mut u8,
) -> bool {
    guarded("createTradeData", || {
        if out.is_null() {
            return false;
        }
        let text = |p| unsafe { c_str(p) }.unwrap_or_default();
        let close = unsafe { c_str(close_time) };
        let trade = TradeSnapshot::new(
            account,
            ticket,
            &text(symbol),
            &text(side),
            lots,
            open_price,
            stop_loss,
            take_profit,
            profit,
            &text(open_time),
            close.as_deref(),
        );
        let bytes = encode(&[trade]);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, TRADE_STRIDE) };
        true
    })
}

/// Fill `out` (exactly 56 bytes) with one exposure record.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn createExposureData(
    snapshot_time: *const c_char,
    currency: *const c_char,
    amount: f64,
    rate_to_usd: f64,
    usd_value: f64,
    out: *mut u8,
) -> bool {
    guarded("createExposureData", || {
        if out.is_null() {
            return false;
        }
        let snapshot_time = unsafe { c_str(snapshot_time) }.unwrap_or_default();
        let currency = unsafe { c_str(currency) }.unwrap_or_default();
        let exposure = ExposureSnapshot::new(&snapshot_time, &currency, amount, rate_to_usd, usd_value);
        let bytes = encode(&[exposure]);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, EXPOSURE_STRIDE) };
        true
    })
}

//! Snapshot records produced by the trading terminal.
//!
//! Text fields are [`BoundedText`] values: they are truncated on
//! construction to the capacity of their fixed-width slot in the binary
//! layout (slot width minus the terminator byte), so a record built from
//! text and one decoded from bytes always agree.
use std::fmt;

/// UTF-8 text holding at most `CAP` bytes.
///
/// Construction never fails. Text ends at the first NUL, as it would in
/// a terminated slot, and overlong input is cut at the last char boundary
/// that fits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BoundedText<const CAP: usize>(String);

impl<const CAP: usize> BoundedText<CAP> {
    pub const CAPACITY: usize = CAP;

    pub fn new(s: &str) -> Self {
        let s = s.split('\0').next().unwrap_or_default();
        Self(clamp(s, CAP).to_owned())
    }

    /// Build from a fixed-width byte slot. Reads up to the first NUL, never
    /// more than `CAP` bytes and never past the slot.
    pub fn from_slot(slot: &[u8]) -> Self {
        let limit = slot.len().min(CAP);
        let window = &slot[..limit];
        let end = window.iter().position(|&b| b == 0).unwrap_or(limit);
        let text = String::from_utf8_lossy(&window[..end]);
        // lossy replacement may have grown the text past CAP
        Self::new(&text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn clamp(s: &str, cap: usize) -> &str {
    if s.len() <= cap {
        return s;
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl<const CAP: usize> fmt::Display for BoundedText<CAP> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const CAP: usize> AsRef<str> for BoundedText<CAP> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const CAP: usize> From<&str> for BoundedText<CAP> {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

pub type Symbol = BoundedText<31>;
pub type OrderSide = BoundedText<15>;
pub type Timestamp = BoundedText<23>;
pub type Currency = BoundedText<7>;

/// One open or closed position. `ticket` is the upsert key.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSnapshot {
    pub account: i32,
    pub ticket: i32,
    pub symbol: Symbol,
    /// Order type as reported by the terminal (stored in the `type` column).
    pub side: OrderSide,
    pub lots: f64,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit: f64,
    pub open_time: Timestamp,
    /// `None` while the position is open. Never `Some` of an empty string
    /// when built through [`TradeSnapshot::new`].
    pub close_time: Option<Timestamp>,
}

impl TradeSnapshot {
    /// Build a trade, truncating text fields. An empty or missing
    /// `close_time` means the position has not been closed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: i32,
        ticket: i32,
        symbol: &str,
        side: &str,
        lots: f64,
        open_price: f64,
        stop_loss: f64,
        take_profit: f64,
        profit: f64,
        open_time: &str,
        close_time: Option<&str>,
    ) -> Self {
        Self {
            account,
            ticket,
            symbol: Symbol::new(symbol),
            side: OrderSide::new(side),
            lots,
            open_price,
            stop_loss,
            take_profit,
            profit,
            open_time: Timestamp::new(open_time),
            close_time: close_time.map(Timestamp::new).filter(|t| !t.is_empty()),
        }
    }

    /// Close time as it should be persisted: absent for the empty sentinel.
    pub fn stored_close_time(&self) -> Option<&str> {
        self.close_time.as_ref().map(Timestamp::as_str).filter(|s| !s.is_empty())
    }
}

/// Current balance of one currency. `currency` is the upsert key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSnapshot {
    pub snapshot_time: Timestamp,
    pub currency: Currency,
    pub amount: f64,
    pub rate_to_usd: f64,
    pub usd_value: f64,
}

impl ExposureSnapshot {
    pub fn new(snapshot_time: &str, currency: &str, amount: f64, rate_to_usd: f64, usd_value: f64) -> Self {
        Self {
            snapshot_time: Timestamp::new(snapshot_time),
            currency: Currency::new(currency),
            amount,
            rate_to_usd,
            usd_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_capacity() {
        let s = Currency::new("EURUSDXYZ");
        assert_eq!(s.as_str(), "EURUSDX");
        assert_eq!(Currency::CAPACITY, 7);
        assert_eq!(Symbol::new("EURUSD").as_str(), "EURUSD");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; the 7th byte lands in the middle of it
        let s = Currency::new("abcdefé");
        assert_eq!(s.as_str(), "abcdef");
    }

    #[test]
    fn slot_stops_at_nul_and_clamps_unterminated() {
        let mut slot = [0u8; 8];
        slot[..3].copy_from_slice(b"USD");
        assert_eq!(Currency::from_slot(&slot).as_str(), "USD");

        let full = *b"ABCDEFGH";
        assert_eq!(Currency::from_slot(&full).as_str(), "ABCDEFG");

        assert!(Currency::from_slot(&[0u8; 8]).is_empty());
    }

    #[test]
    fn embedded_nul_ends_the_text() {
        assert_eq!(Symbol::new("EUR\0USD").as_str(), "EUR");
        assert!(Symbol::new("\0EURUSD").is_empty());

        let t = TradeSnapshot::new(1, 2, "EUR\0USD", "BUY", 1.0, 1.1, 1.0, 1.2, 0.0, "2024-01-01T00:00:00", Some("\0x"));
        assert_eq!(t.symbol.as_str(), "EUR");
        assert_eq!(t.close_time, None);
    }

    #[test]
    fn empty_close_time_is_absent() {
        let t = TradeSnapshot::new(1, 2, "EURUSD", "BUY", 1.0, 1.1, 1.0, 1.2, 0.0, "2024-01-01T00:00:00", Some(""));
        assert_eq!(t.close_time, None);
        assert_eq!(t.stored_close_time(), None);

        let t = TradeSnapshot::new(1, 2, "EURUSD", "BUY", 1.0, 1.1, 1.0, 1.2, 0.0, "2024-01-01T00:00:00", Some("2024-01-02T00:00:00"));
        assert_eq!(t.stored_close_time(), Some("2024-01-02T00:00:00"));
    }

    #[test]
    fn explicit_empty_sentinel_still_stores_absent() {
        let mut t = TradeSnapshot::new(1, 2, "EURUSD", "BUY", 1.0, 1.1, 1.0, 1.2, 0.0, "x", None);
        t.close_time = Some(Timestamp::new(""));
        assert_eq!(t.stored_close_time(), None);
    }
}

//! Fixed-stride binary layout shared with the terminal.
//!
//! Records are packed back to back with no header. All integers and floats
//! are little-endian; text slots are NUL-padded and may lack a terminator.
//!
//! Trade record (144 bytes):
//! `[account:i32][ticket:i32][symbol:32][type:16][lots:f64][open_price:f64]`
//! `[stop_loss:f64][take_profit:f64][profit:f64][open_time:24][close_time:24]`
//!
//! Exposure record (56 bytes):
//! `[snapshot_time:24][currency:8][amount:f64][rate_to_usd:f64][usd_value:f64]`
//!
//! Decoding reads each field from a validated offset inside its own
//! stride-sized window; nothing is reinterpreted in place.
use crate::error::LayoutError;
use crate::record::{BoundedText, ExposureSnapshot, TradeSnapshot};

pub const SYMBOL_WIDTH: usize = 32;
pub const SIDE_WIDTH: usize = 16;
pub const TIME_WIDTH: usize = 24;
pub const CURRENCY_WIDTH: usize = 8;

pub const TRADE_STRIDE: usize = 4 + 4 + SYMBOL_WIDTH + SIDE_WIDTH + 5 * 8 + 2 * TIME_WIDTH;
pub const EXPOSURE_STRIDE: usize = TIME_WIDTH + CURRENCY_WIDTH + 3 * 8;

/// A record with a fixed on-wire width.
pub trait FixedRecord: Sized {
    const STRIDE: usize;

    /// Materialize one record from a window of exactly `STRIDE` bytes.
    ///
    /// # Panics
    ///
    /// When `window` is shorter than `STRIDE`. [`decode`] only ever hands
    /// out full windows.
    fn read(window: &[u8]) -> Self;

    /// Append exactly `STRIDE` bytes to `out`.
    fn write(&self, out: &mut Vec<u8>);
}

/// Sequential field reader over one record window.
struct Fields<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut tmp = [0u8; N];
        tmp.copy_from_slice(&self.buf[self.off..self.off + N]);
        self.off += N;
        tmp
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take::<4>())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take::<8>())
    }

    fn text<const CAP: usize>(&mut self, width: usize) -> BoundedText<CAP> {
        let slot = &self.buf[self.off..self.off + width];
        self.off += width;
        BoundedText::from_slot(slot)
    }
}

/// Write `s` into a `width`-byte NUL-padded slot, keeping the last byte as
/// terminator.
fn put_text(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}

impl FixedRecord for TradeSnapshot {
    const STRIDE: usize = TRADE_STRIDE;

    fn read(window: &[u8]) -> Self {
        debug_assert_eq!(window.len(), Self::STRIDE);
        let mut f = Fields::new(window);
        let account = f.i32();
        let ticket = f.i32();
        let symbol = f.text(SYMBOL_WIDTH);
        let side = f.text(SIDE_WIDTH);
        let lots = f.f64();
        let open_price = f.f64();
        let stop_loss = f.f64();
        let take_profit = f.f64();
        let profit = f.f64();
        let open_time = f.text(TIME_WIDTH);
        let close_time: BoundedText<23> = f.text(TIME_WIDTH);
        Self {
            account,
            ticket,
            symbol,
            side,
            lots,
            open_price,
            stop_loss,
            take_profit,
            profit,
            open_time,
            close_time: Some(close_time).filter(|t| !t.is_empty()),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.account.to_le_bytes());
        out.extend_from_slice(&self.ticket.to_le_bytes());
        put_text(out, self.symbol.as_str(), SYMBOL_WIDTH);
        put_text(out, self.side.as_str(), SIDE_WIDTH);
        for v in [self.lots, self.open_price, self.stop_loss, self.take_profit, self.profit] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        put_text(out, self.open_time.as_str(), TIME_WIDTH);
        put_text(out, self.stored_close_time().unwrap_or(""), TIME_WIDTH);
    }
}

impl FixedRecord for ExposureSnapshot {
    const STRIDE: usize = EXPOSURE_STRIDE;

    fn read(window: &[u8]) -> Self {
        debug_assert_eq!(window.len(), Self::STRIDE);
        let mut f = Fields::new(window);
        Self {
            snapshot_time: f.text(TIME_WIDTH),
            currency: f.text(CURRENCY_WIDTH),
            amount: f.f64(),
            rate_to_usd: f.f64(),
            usd_value: f.f64(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        put_text(out, self.snapshot_time.as_str(), TIME_WIDTH);
        put_text(out, self.currency.as_str(), CURRENCY_WIDTH);
        for v in [self.amount, self.rate_to_usd, self.usd_value] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Partition `buf` into `stride`-sized windows and decode each one.
///
/// Fails without producing any record when the buffer is empty, when
/// `stride` is not the record's width, or when the length leaves a
/// remainder.
pub fn decode<R: FixedRecord>(buf: &[u8], stride: usize) -> Result<Vec<R>, LayoutError> {
    if buf.is_empty() {
        return Err(LayoutError::Empty);
    }
    if stride != R::STRIDE {
        return Err(LayoutError::StrideMismatch { stride, expected: R::STRIDE });
    }
    if buf.len() % stride != 0 {
        return Err(LayoutError::Remainder { len: buf.len(), stride });
    }
    Ok(buf.chunks_exact(stride).map(R::read).collect())
}

/// [`decode`] with the record's own stride.
pub fn decode_all<R: FixedRecord>(buf: &[u8]) -> Result<Vec<R>, LayoutError> {
    decode(buf, R::STRIDE)
}

/// Serialize records back to back in the fixed layout.
pub fn encode<R: FixedRecord>(records: &[R]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * R::STRIDE);
    for r in records {
        r.write(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(ticket: i32, close: Option<&str>) -> TradeSnapshot {
        TradeSnapshot::new(7, ticket, "EURUSD", "BUY", 1.0, 1.1, 1.09, 1.11, 5.0, "2024-01-01T00:00:00", close)
    }

    #[test]
    #[should_panic]
    fn short_window_is_refused() {
        let bytes = encode(&[trade(1, None)]);
        let _ = TradeSnapshot::read(&bytes[..TRADE_STRIDE - 1]);
    }

    #[test]
    fn strides_match_terminal_structs() {
        assert_eq!(TRADE_STRIDE, 144);
        assert_eq!(EXPOSURE_STRIDE, 56);
    }

    #[test]
    fn decode_count_matches_length() {
        let bytes = encode(&[trade(1, None), trade(2, Some("2024-01-02T00:00:00")), trade(3, None)]);
        assert_eq!(bytes.len(), 3 * TRADE_STRIDE);
        let out: Vec<TradeSnapshot> = decode(&bytes, TRADE_STRIDE).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].ticket, 2);
        assert_eq!(out[1].close_time.as_ref().map(|t| t.as_str()), Some("2024-01-02T00:00:00"));
        assert_eq!(out[0].close_time, None);
    }

    #[test]
    fn rejects_remainder_empty_and_wrong_stride() {
        let bytes = encode(&[trade(1, None)]);
        for cut in [1, 10, TRADE_STRIDE - 1] {
            let err = decode::<TradeSnapshot>(&bytes[..cut], TRADE_STRIDE).unwrap_err();
            assert_eq!(err, LayoutError::Remainder { len: cut, stride: TRADE_STRIDE });
        }
        assert_eq!(decode::<TradeSnapshot>(&[], TRADE_STRIDE).unwrap_err(), LayoutError::Empty);
        assert!(matches!(
            decode::<TradeSnapshot>(&bytes, EXPOSURE_STRIDE),
            Err(LayoutError::StrideMismatch { stride: 56, expected: 144 })
        ));
    }

    #[test]
    fn unterminated_text_slot_is_clamped() {
        let mut bytes = encode(&[ExposureSnapshot::new("2024-01-01T00:00:00", "USD", 1.0, 1.0, 1.0)]);
        // fill the whole currency slot, terminator included
        bytes[TIME_WIDTH..TIME_WIDTH + CURRENCY_WIDTH].copy_from_slice(b"ABCDEFGH");
        let out: Vec<ExposureSnapshot> = decode_all(&bytes).unwrap();
        assert_eq!(out[0].currency.as_str(), "ABCDEFG");
        assert_eq!(out[0].amount, 1.0);
    }

    #[test]
    fn field_offsets_follow_layout() {
        let bytes = encode(&[trade(100, None)]);
        assert_eq!(&bytes[0..4], &7i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &100i32.to_le_bytes());
        assert_eq!(&bytes[8..14], b"EURUSD");
        assert_eq!(bytes[14], 0);
        assert_eq!(&bytes[40..43], b"BUY");
        assert_eq!(&bytes[56..64], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[88..96], &5.0f64.to_le_bytes());
        assert_eq!(&bytes[96..115], b"2024-01-01T00:00:00");
        assert!(bytes[120..144].iter().all(|&b| b == 0));
    }
}

//! Binary tick decoder for the SmartAPI v2 market feed.
//!
//! Every binary frame on the stream is one tick for one instrument. The first
//! byte names the subscription tier and decides how far the packet extends:
//!
//! | Tier | Bytes | Adds |
//! |---|---|---|
//! | LTP | 51 | common prefix only |
//! | QUOTE | 123 | last qty, ATP, volume, buy/sell totals, OHLC |
//! | SNAP_QUOTE | 379 | OI, best five levels, circuit limits, 52-week range |
//! | DEPTH | 51 | prefix; the timestamp field is the packet received time |
//!
//! All multi-byte fields are little-endian. Prices travel as integer paise and
//! are divided by 100. Decoding is a pure function over the frame bytes: fields
//! that do not belong to the decoded tier are simply absent from the
//! [`ParsedTick`] variant and never read from the buffer.
//!
//! # Example
//!
//! ```
//! use smartstream_rs::ws::market_feed::{parse_packet, ParsedTick};
//!
//! let mut frame = vec![0u8; 51];
//! frame[0] = 1; // LTP
//! frame[1] = 1; // NSE_CM
//! frame[2..6].copy_from_slice(b"5900");
//! frame[43..51].copy_from_slice(&1_950_000i64.to_le_bytes());
//!
//! let tick = parse_packet(&frame)?;
//! assert!(matches!(tick, ParsedTick::Ltp { .. }));
//! assert_eq!(tick.header().token, "5900");
//! assert_eq!(tick.header().last_traded_price, 19500.0);
//! # Ok::<(), smartstream_rs::StreamError>(())
//! ```

use chrono::{DateTime, Utc};

use crate::constants::packet;
use crate::error::{Result, StreamError};
use crate::types::enums::{ExchangeType, SubscriptionMode};

// ---------------------------------------------------------------------------
// Offset table
// ---------------------------------------------------------------------------

/// Byte offsets of every decoded field (start of field).
mod offsets {
    pub const MODE: usize = 0;
    pub const EXCHANGE_TYPE: usize = 1;
    pub const TOKEN: usize = 2;
    pub const TOKEN_LEN: usize = 25;
    pub const SEQUENCE_NUMBER: usize = 27;
    pub const EXCHANGE_TIMESTAMP: usize = 35;
    pub const LAST_TRADED_PRICE: usize = 43;

    pub const LAST_TRADED_QUANTITY: usize = 51;
    pub const AVERAGE_TRADED_PRICE: usize = 59;
    pub const VOLUME: usize = 67;
    pub const TOTAL_BUY_QUANTITY: usize = 75;
    pub const TOTAL_SELL_QUANTITY: usize = 83;
    pub const OPEN: usize = 91;
    pub const HIGH: usize = 99;
    pub const LOW: usize = 107;
    pub const CLOSE: usize = 115;

    pub const LAST_TRADED_TIMESTAMP: usize = 123;
    pub const OPEN_INTEREST: usize = 131;
    pub const OPEN_INTEREST_CHANGE: usize = 139;
    pub const BEST_FIVE: usize = 147;
    pub const BEST_FIVE_ENTRY_LEN: usize = 20;
    pub const BEST_FIVE_ENTRIES: usize = 10;
    pub const UPPER_CIRCUIT: usize = 347;
    pub const LOWER_CIRCUIT: usize = 355;
    pub const HIGH_52_WEEK: usize = 363;
    pub const LOW_52_WEEK: usize = 371;
}

// ---------------------------------------------------------------------------
// Parsed tick types
// ---------------------------------------------------------------------------

/// Fields shared by every tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TickHeader {
    /// Tier the packet was encoded with.
    pub mode: SubscriptionMode,
    /// Raw exchange byte (always available even if the code is unknown).
    pub exchange_type_raw: u8,
    /// Exchange the instrument trades on, when the code is known.
    pub exchange_type: Option<ExchangeType>,
    /// Instrument token.
    pub token: String,
    /// Feed sequence number.
    pub sequence_number: i64,
    /// Exchange timestamp in epoch milliseconds.
    pub exchange_timestamp: i64,
    /// Last traded price.
    pub last_traded_price: f64,
}

impl TickHeader {
    /// The exchange timestamp as a UTC date-time, if it is in range.
    pub fn exchange_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.exchange_timestamp)
    }
}

/// Fields present in QUOTE and SNAP_QUOTE packets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuoteFields {
    pub last_traded_quantity: i64,
    pub average_traded_price: f64,
    pub volume_trade_for_the_day: i64,
    pub total_buy_quantity: f64,
    pub total_sell_quantity: f64,
    pub open_price_of_the_day: f64,
    pub high_price_of_the_day: f64,
    pub low_price_of_the_day: f64,
    pub closed_price: f64,
}

/// One entry of the best-five order book carried by SNAP_QUOTE packets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestFiveLevel {
    /// Side flag as sent by the feed (0 = sell, otherwise buy).
    pub flag: u16,
    /// Quantity at this level.
    pub quantity: i64,
    /// Price at this level.
    pub price: f64,
    /// Number of orders at this level.
    pub orders: u16,
}

/// Fields present only in SNAP_QUOTE packets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapQuoteFields {
    /// Last traded time in epoch seconds.
    pub last_traded_timestamp: i64,
    pub open_interest: i64,
    pub open_interest_change_percentage: i64,
    /// Bid side of the best-five book.
    pub best_five_buy: Vec<BestFiveLevel>,
    /// Ask side of the best-five book.
    pub best_five_sell: Vec<BestFiveLevel>,
    pub upper_circuit_limit: f64,
    pub lower_circuit_limit: f64,
    pub high_52_week_price: f64,
    pub low_52_week_price: f64,
}

/// A decoded tick, one variant per subscription tier.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTick {
    /// LTP tier.
    Ltp { header: TickHeader },
    /// QUOTE tier.
    Quote { header: TickHeader, quote: QuoteFields },
    /// SNAP_QUOTE tier.
    SnapQuote {
        header: TickHeader,
        quote: QuoteFields,
        snap: SnapQuoteFields,
    },
    /// DEPTH tier.
    Depth {
        header: TickHeader,
        /// Time the feed received the packet, in epoch milliseconds.
        packet_received_time: i64,
    },
}

impl ParsedTick {
    /// Fields shared by every tier.
    pub fn header(&self) -> &TickHeader {
        match self {
            Self::Ltp { header }
            | Self::Quote { header, .. }
            | Self::SnapQuote { header, .. }
            | Self::Depth { header, .. } => header,
        }
    }

    /// Tier this tick was decoded with.
    pub fn mode(&self) -> SubscriptionMode {
        self.header().mode
    }

    /// Quote fields, present for QUOTE and SNAP_QUOTE ticks.
    pub fn quote(&self) -> Option<&QuoteFields> {
        match self {
            Self::Quote { quote, .. } | Self::SnapQuote { quote, .. } => Some(quote),
            _ => None,
        }
    }

    /// SNAP_QUOTE-only fields.
    pub fn snap_quote(&self) -> Option<&SnapQuoteFields> {
        match self {
            Self::SnapQuote { snap, .. } => Some(snap),
            _ => None,
        }
    }

    /// Packet received time, present for DEPTH ticks.
    pub fn packet_received_time(&self) -> Option<i64> {
        match self {
            Self::Depth {
                packet_received_time,
                ..
            } => Some(*packet_received_time),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed-offset readers
// ---------------------------------------------------------------------------

// Callers check the packet length against the tier table before reading.

#[inline(always)]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline(always)]
fn read_i64_le(data: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

#[inline(always)]
fn read_f64_le(data: &[u8], offset: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    f64::from_le_bytes(buf)
}

/// Read an `i64` price in paise and scale it to rupees.
#[inline(always)]
fn read_price(data: &[u8], offset: usize) -> f64 {
    read_i64_le(data, offset) as f64 / packet::PRICE_SCALE
}

/// Read the NUL-terminated ASCII token field.
fn read_token(data: &[u8]) -> String {
    let field = &data[offsets::TOKEN..offsets::TOKEN + offsets::TOKEN_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// ---------------------------------------------------------------------------
// Tier dispatch table
// ---------------------------------------------------------------------------

/// How to decode one tier: the bytes it needs and the function that extends
/// the common header into the tier's variant.
struct TierLayout {
    min_len: usize,
    decode: fn(&[u8], TickHeader) -> ParsedTick,
}

/// Indexed by `mode code - 1`.
static TIERS: [TierLayout; 4] = [
    TierLayout {
        min_len: packet::LTP_LEN,
        decode: decode_ltp,
    },
    TierLayout {
        min_len: packet::QUOTE_LEN,
        decode: decode_quote,
    },
    TierLayout {
        min_len: packet::SNAP_QUOTE_LEN,
        decode: decode_snap_quote,
    },
    TierLayout {
        min_len: packet::DEPTH_LEN,
        decode: decode_depth,
    },
];

fn tier(mode: SubscriptionMode) -> &'static TierLayout {
    &TIERS[usize::from(mode.code() - 1)]
}

fn decode_ltp(_data: &[u8], header: TickHeader) -> ParsedTick {
    ParsedTick::Ltp { header }
}

fn decode_quote(data: &[u8], header: TickHeader) -> ParsedTick {
    ParsedTick::Quote {
        header,
        quote: parse_quote_fields(data),
    }
}

fn decode_snap_quote(data: &[u8], header: TickHeader) -> ParsedTick {
    ParsedTick::SnapQuote {
        header,
        quote: parse_quote_fields(data),
        snap: parse_snap_quote_fields(data),
    }
}

fn decode_depth(data: &[u8], header: TickHeader) -> ParsedTick {
    ParsedTick::Depth {
        header,
        packet_received_time: read_i64_le(data, offsets::EXCHANGE_TIMESTAMP),
    }
}

fn parse_header(data: &[u8], mode: SubscriptionMode) -> TickHeader {
    let exchange_type_raw = data[offsets::EXCHANGE_TYPE];
    TickHeader {
        mode,
        exchange_type_raw,
        exchange_type: ExchangeType::from_code(exchange_type_raw),
        token: read_token(data),
        sequence_number: read_i64_le(data, offsets::SEQUENCE_NUMBER),
        exchange_timestamp: read_i64_le(data, offsets::EXCHANGE_TIMESTAMP),
        last_traded_price: read_price(data, offsets::LAST_TRADED_PRICE),
    }
}

fn parse_quote_fields(data: &[u8]) -> QuoteFields {
    QuoteFields {
        last_traded_quantity: read_i64_le(data, offsets::LAST_TRADED_QUANTITY),
        average_traded_price: read_price(data, offsets::AVERAGE_TRADED_PRICE),
        volume_trade_for_the_day: read_i64_le(data, offsets::VOLUME),
        total_buy_quantity: read_f64_le(data, offsets::TOTAL_BUY_QUANTITY),
        total_sell_quantity: read_f64_le(data, offsets::TOTAL_SELL_QUANTITY),
        open_price_of_the_day: read_price(data, offsets::OPEN),
        high_price_of_the_day: read_price(data, offsets::HIGH),
        low_price_of_the_day: read_price(data, offsets::LOW),
        closed_price: read_price(data, offsets::CLOSE),
    }
}

fn parse_snap_quote_fields(data: &[u8]) -> SnapQuoteFields {
    let mut best_five_buy = Vec::with_capacity(5);
    let mut best_five_sell = Vec::with_capacity(5);
    for i in 0..offsets::BEST_FIVE_ENTRIES {
        let base = offsets::BEST_FIVE + i * offsets::BEST_FIVE_ENTRY_LEN;
        let level = BestFiveLevel {
            flag: read_u16_le(data, base),
            quantity: read_i64_le(data, base + 2),
            price: read_price(data, base + 10),
            orders: read_u16_le(data, base + 18),
        };
        if level.flag == 0 {
            best_five_sell.push(level);
        } else {
            best_five_buy.push(level);
        }
    }

    SnapQuoteFields {
        last_traded_timestamp: read_i64_le(data, offsets::LAST_TRADED_TIMESTAMP),
        open_interest: read_i64_le(data, offsets::OPEN_INTEREST),
        open_interest_change_percentage: read_i64_le(data, offsets::OPEN_INTEREST_CHANGE),
        best_five_buy,
        best_five_sell,
        upper_circuit_limit: read_price(data, offsets::UPPER_CIRCUIT),
        lower_circuit_limit: read_price(data, offsets::LOWER_CIRCUIT),
        high_52_week_price: read_price(data, offsets::HIGH_52_WEEK),
        low_52_week_price: read_price(data, offsets::LOW_52_WEEK),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Decode one binary frame into a [`ParsedTick`].
///
/// Fails with [`StreamError::MalformedPacket`] when the frame is shorter than
/// the common 51-byte prefix, carries an unknown mode byte, or is shorter than
/// its declared tier requires. Bytes past the tier's extent are ignored.
pub fn parse_packet(data: &[u8]) -> Result<ParsedTick> {
    if data.len() < packet::MIN_LEN {
        return Err(StreamError::MalformedPacket(format!(
            "packet too short: {} bytes (need ≥ {})",
            data.len(),
            packet::MIN_LEN
        )));
    }

    let mode_byte = data[offsets::MODE];
    let mode = SubscriptionMode::from_code(mode_byte).ok_or_else(|| {
        StreamError::MalformedPacket(format!("unknown subscription mode: {mode_byte}"))
    })?;

    let layout = tier(mode);
    if data.len() < layout.min_len {
        return Err(StreamError::MalformedPacket(format!(
            "{mode} packet too short: {} bytes (need ≥ {})",
            data.len(),
            layout.min_len
        )));
    }

    let header = parse_header(data, mode);
    Ok((layout.decode)(data, header))
}

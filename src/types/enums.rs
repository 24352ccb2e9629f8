//! Shared enum types that map directly to SmartAPI stream codes.
//!
//! Exchange variant names use `SCREAMING_SNAKE_CASE` to match the names the
//! venue uses in its documentation and instrument master, so we suppress the
//! Rust naming convention lint.
#![allow(non_camel_case_types)]

use serde::Serialize;

// ---------------------------------------------------------------------------
// Subscription Mode
// ---------------------------------------------------------------------------

/// Data-richness tier requested per instrument.
///
/// The same code appears in control frames (`params.mode`) and as the first
/// byte of every binary tick packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SubscriptionMode {
    /// Last traded price only.
    Ltp = 1,
    /// LTP plus OHLC, volume and buy/sell totals.
    Quote = 2,
    /// Quote plus open interest, best five levels, circuit limits and 52-week range.
    SnapQuote = 3,
    /// Order-book depth tier.
    Depth = 4,
}

impl SubscriptionMode {
    /// All modes in wire-code order.
    pub const ALL: [Self; 4] = [Self::Ltp, Self::Quote, Self::SnapQuote, Self::Depth];

    /// Returns the numeric mode code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a mode from its numeric code (first byte of a binary packet).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Ltp),
            2 => Some(Self::Quote),
            3 => Some(Self::SnapQuote),
            4 => Some(Self::Depth),
            _ => None,
        }
    }

    /// Venue name of the tier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "LTP",
            Self::Quote => "QUOTE",
            Self::SnapQuote => "SNAP_QUOTE",
            Self::Depth => "DEPTH",
        }
    }
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubscriptionMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

// ---------------------------------------------------------------------------
// Exchange Type
// ---------------------------------------------------------------------------

/// Exchange and segment identifier used by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExchangeType {
    /// NSE cash market (code 1).
    NSE_CM,
    /// NSE futures & options (code 2).
    NSE_FO,
    /// BSE cash market (code 3).
    BSE_CM,
    /// BSE futures & options (code 4).
    BSE_FO,
    /// MCX futures & options (code 5).
    MCX_FO,
    /// NCDEX futures & options (code 7).
    NCX_FO,
    /// Currency derivatives (code 13).
    CDE_FO,
}

impl ExchangeType {
    /// Returns the numeric exchange code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::NSE_CM => 1,
            Self::NSE_FO => 2,
            Self::BSE_CM => 3,
            Self::BSE_FO => 4,
            Self::MCX_FO => 5,
            Self::NCX_FO => 7,
            Self::CDE_FO => 13,
        }
    }

    /// Construct from a numeric exchange code (as found in binary packets).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::NSE_CM),
            2 => Some(Self::NSE_FO),
            3 => Some(Self::BSE_CM),
            4 => Some(Self::BSE_FO),
            5 => Some(Self::MCX_FO),
            7 => Some(Self::NCX_FO),
            13 => Some(Self::CDE_FO),
            _ => None,
        }
    }
}

impl Serialize for ExchangeType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Action code carried by control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    /// Stop streaming the listed tokens.
    Unsubscribe = 0,
    /// Start streaming the listed tokens.
    Subscribe = 1,
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

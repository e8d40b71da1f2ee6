//! Trade and Quote Records
//!
//! Decoded forms of the wire messages. Field semantics are shared between
//! live and replay modes; the frame codec produces these and the session
//! controller hands them to user callbacks.

use serde::{Deserialize, Serialize};

/// Origin feed within a grouped provider, carried per message.
///
/// Unknown wire values map to [`SubProvider::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubProvider {
    /// No sub-provider reported.
    #[default]
    None,
    /// CTA tape A.
    CtaA,
    /// CTA tape B.
    CtaB,
    /// UTP.
    Utp,
    /// OTC markets.
    Otc,
    /// NASDAQ Basic.
    NasdaqBasic,
    /// IEX.
    Iex,
    /// CBOE One.
    CboeOne,
}

impl From<u8> for SubProvider {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::CtaA,
            2 => Self::CtaB,
            3 => Self::Utp,
            4 => Self::Otc,
            5 => Self::NasdaqBasic,
            6 => Self::Iex,
            7 => Self::CboeOne,
            _ => Self::None,
        }
    }
}

impl SubProvider {
    /// Wire discriminant for this sub-provider.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::CtaA => 1,
            Self::CtaB => 2,
            Self::Utp => 3,
            Self::Otc => 4,
            Self::NasdaqBasic => 5,
            Self::Iex => 6,
            Self::CboeOne => 7,
        }
    }
}

/// Side of a quote message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteKind {
    /// Offer to sell.
    Ask,
    /// Offer to buy.
    Bid,
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Ticker symbol (e.g. "AAPL").
    pub symbol: String,
    /// Execution price in USD, non-negative, four digits of precision.
    pub price: f64,
    /// Share count of this execution.
    pub size: u32,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    /// Cumulative daily volume for the symbol as of this trade.
    pub total_volume: u32,
    /// Origin feed within the provider group.
    pub sub_provider: SubProvider,
    /// Market-center code (single UTF-16 code unit).
    pub market_center: char,
    /// Trade condition string; empty when the wire carries none.
    pub condition: String,
}

/// A single bid or ask update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Which side of the book this quote updates.
    pub kind: QuoteKind,
    /// Ticker symbol (e.g. "AAPL").
    pub symbol: String,
    /// Quoted price in USD, non-negative, four digits of precision.
    pub price: f64,
    /// Quoted size in shares.
    pub size: u32,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    /// Origin feed within the provider group.
    pub sub_provider: SubProvider,
    /// Market-center code (single UTF-16 code unit).
    pub market_center: char,
    /// Quote condition string; empty when the wire carries none.
    pub condition: String,
}

/// One decoded sub-message from an inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamMessage {
    /// An executed trade.
    Trade(Trade),
    /// A bid or ask update.
    Quote(Quote),
}

impl StreamMessage {
    /// The ticker symbol this message refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::Quote(q) => &q.symbol,
        }
    }

    /// Nanosecond timestamp of the message.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::Trade(t) => t.timestamp,
            Self::Quote(q) => q.timestamp,
        }
    }
}

//! Binary Frame Codec
//!
//! Parsing of inbound multi-message frames and construction of outbound
//! control frames.
//!
//! # Frame envelope
//!
//! The first byte of an inbound binary message is the number of
//! concatenated sub-messages. Each sub-message starts with:
//!
//! ```text
//! offset 0: msgType  (u8)   0 = trade, 1 = ask, 2 = bid
//! offset 1: msgLen   (u8)   total bytes of this sub-message, header included
//! offset 2: symLen   (u8)   symbol length
//! offset 3: symbol   (ASCII, symLen bytes)
//! ```
//!
//! followed by a fixed little-endian suffix that differs between trades and
//! quotes (see [`parse_frame`]). The cursor always advances by `msgLen`, so
//! one undecodable sub-message never desynchronizes the rest of the frame.
//!
//! # Control frames
//!
//! Join and leave frames are client-to-server: a one-byte opcode (`'J'` or
//! `'L'`), a trades-only flag byte on join, then the channel as ASCII. The
//! `$lobby` channel is spelled `$FIREHOSE` on the wire.

use crate::bytes;
use crate::messages::{Quote, QuoteKind, StreamMessage, SubProvider, Trade};
use crate::subscription::{LOBBY_CHANNEL, MAX_CHANNEL_LEN};

/// Join control-frame opcode (`'J'`).
pub const JOIN_OPCODE: u8 = 0x4A;

/// Leave control-frame opcode (`'L'`).
pub const LEAVE_OPCODE: u8 = 0x4C;

/// Wire spelling of the `$lobby` channel in control frames.
pub const FIREHOSE_TOKEN: &str = "$FIREHOSE";

/// Application-level heartbeat: an empty binary payload.
pub const HEARTBEAT_PAYLOAD: &[u8] = &[];

const TRADE_TYPE: u8 = 0;
const ASK_TYPE: u8 = 1;
const BID_TYPE: u8 = 2;

/// Smallest possible sub-message: header bytes plus an empty symbol would
/// still need the fixed suffix, but three bytes is the floor the envelope
/// itself imposes.
const MIN_SUB_MESSAGE: usize = 3;

// =============================================================================
// Error Type
// =============================================================================

/// Frame-level decode errors.
///
/// Sub-message-level problems (unknown type, length-invariant violations)
/// are logged and skipped; only damage to the envelope itself surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A sub-message runs past the end of the frame.
    #[error("frame truncated: sub-message at offset {offset} overruns the frame")]
    Truncated {
        /// Byte offset of the offending sub-message.
        offset: usize,
    },

    /// A sub-message declares a length too small to hold its own header.
    #[error("sub-message at offset {offset} declares impossible length {len}")]
    BadLength {
        /// Byte offset of the offending sub-message.
        offset: usize,
        /// Declared length.
        len: usize,
    },
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one inbound binary frame into its decoded sub-messages.
///
/// Sub-messages of unknown type or with internal length mismatches are
/// logged and skipped; the cursor still advances by the declared length so
/// the remainder of the frame parses. An empty payload (a heartbeat echo)
/// yields an empty vector.
///
/// # Errors
///
/// Returns an error when the envelope itself is malformed: a sub-message
/// overrunning the frame, or a declared length too small to be real.
pub fn parse_frame(frame: &[u8]) -> Result<Vec<StreamMessage>, CodecError> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }

    let count = usize::from(frame[0]);
    let mut messages = Vec::with_capacity(count);
    let mut cursor = 1usize;

    for index in 0..count {
        let header = frame
            .get(cursor..cursor + 2)
            .ok_or(CodecError::Truncated { offset: cursor })?;
        let msg_type = header[0];
        let msg_len = usize::from(header[1]);

        if msg_len < MIN_SUB_MESSAGE {
            return Err(CodecError::BadLength {
                offset: cursor,
                len: msg_len,
            });
        }

        let end = cursor + msg_len;
        let body = frame
            .get(cursor..end)
            .ok_or(CodecError::Truncated { offset: cursor })?;

        match msg_type {
            TRADE_TYPE => match parse_trade(body) {
                Some(trade) => messages.push(StreamMessage::Trade(trade)),
                None => {
                    tracing::warn!(index, offset = cursor, "skipping undecodable trade sub-message");
                }
            },
            ASK_TYPE | BID_TYPE => {
                let kind = if msg_type == ASK_TYPE {
                    QuoteKind::Ask
                } else {
                    QuoteKind::Bid
                };
                match parse_quote(kind, body) {
                    Some(quote) => messages.push(StreamMessage::Quote(quote)),
                    None => {
                        tracing::warn!(
                            index,
                            offset = cursor,
                            "skipping undecodable quote sub-message"
                        );
                    }
                }
            }
            other => {
                tracing::warn!(msg_type = other, index, offset = cursor, "unknown sub-message type");
            }
        }

        cursor = end;
    }

    if cursor != frame.len() {
        tracing::warn!(
            consumed = cursor,
            frame_len = frame.len(),
            "trailing bytes after final sub-message"
        );
    }

    Ok(messages)
}

/// Decode a trade sub-message.
///
/// Layout after the three header bytes and the symbol (`sl` = symbol length):
/// sub-provider (u8) at `3+sl`, market center (UTF-16BE unit) at `4+sl`,
/// price (f32) at `6+sl`, size (u32) at `10+sl`, timestamp (u64 ns) at
/// `14+sl`, total volume (u32) at `22+sl`, condition length (u8) at `26+sl`,
/// condition at `27+sl`.
fn parse_trade(body: &[u8]) -> Option<Trade> {
    let sym_len = usize::from(*body.get(2)?);
    let cond_len = usize::from(*body.get(26 + sym_len)?);

    let expected = 27 + sym_len + cond_len;
    if body.len() != expected {
        tracing::warn!(
            declared = body.len(),
            expected,
            "trade sub-message length invariant violated"
        );
        return None;
    }

    let symbol = bytes::read_ascii(body, 3, 3 + sym_len)?;
    let sub_provider = SubProvider::from(body[3 + sym_len]);
    let market_center = bytes::read_utf16_be(body, 4 + sym_len, 6 + sym_len)?.chars().next()?;
    let price = bytes::read_f32(body, 6 + sym_len)?;
    let size = bytes::read_u32(body, 10 + sym_len)?;
    let timestamp = bytes::read_u64(body, 14 + sym_len)?;
    let total_volume = bytes::read_u32(body, 22 + sym_len)?;
    let condition = if cond_len == 0 {
        String::new()
    } else {
        bytes::read_ascii(body, 27 + sym_len, 27 + sym_len + cond_len)?
    };

    Some(Trade {
        symbol,
        price,
        size,
        timestamp,
        total_volume,
        sub_provider,
        market_center,
        condition,
    })
}

/// Decode an ask or bid sub-message.
///
/// Identical to the trade layout through the timestamp, then condition
/// length (u8) at `22+sl` and the condition at `23+sl`. No total volume.
fn parse_quote(kind: QuoteKind, body: &[u8]) -> Option<Quote> {
    let sym_len = usize::from(*body.get(2)?);
    let cond_len = usize::from(*body.get(22 + sym_len)?);

    let expected = 23 + sym_len + cond_len;
    if body.len() != expected {
        tracing::warn!(
            declared = body.len(),
            expected,
            "quote sub-message length invariant violated"
        );
        return None;
    }

    let symbol = bytes::read_ascii(body, 3, 3 + sym_len)?;
    let sub_provider = SubProvider::from(body[3 + sym_len]);
    let market_center = bytes::read_utf16_be(body, 4 + sym_len, 6 + sym_len)?.chars().next()?;
    let price = bytes::read_f32(body, 6 + sym_len)?;
    let size = bytes::read_u32(body, 10 + sym_len)?;
    let timestamp = bytes::read_u64(body, 14 + sym_len)?;
    let condition = if cond_len == 0 {
        String::new()
    } else {
        bytes::read_ascii(body, 23 + sym_len, 23 + sym_len + cond_len)?
    };

    Some(Quote {
        kind,
        symbol,
        price,
        size,
        timestamp,
        sub_provider,
        market_center,
        condition,
    })
}

// =============================================================================
// Control Frames
// =============================================================================

/// Spell a channel the way control frames expect it.
fn wire_channel(channel: &str) -> &str {
    if channel == LOBBY_CHANNEL {
        FIREHOSE_TOKEN
    } else {
        channel
    }
}

/// Build a join control frame: opcode, trades-only flag, channel.
#[must_use]
pub fn join_frame(channel: &str, trades_only: bool) -> Vec<u8> {
    let wire = wire_channel(channel);
    let mut frame = vec![0u8; 2 + wire.len()];
    frame[0] = JOIN_OPCODE;
    frame[1] = u8::from(trades_only);
    bytes::write_ascii(&mut frame, wire, 2);
    frame
}

/// Build a leave control frame: opcode, channel. No flag byte.
#[must_use]
pub fn leave_frame(channel: &str) -> Vec<u8> {
    let wire = wire_channel(channel);
    let mut frame = vec![0u8; 1 + wire.len()];
    frame[0] = LEAVE_OPCODE;
    bytes::write_ascii(&mut frame, wire, 1);
    frame
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a trade as one wire sub-message.
///
/// Used by tick-file tooling and tests; symbols are truncated to the
/// channel limit and conditions to whatever keeps the sub-message within
/// its one-byte length field.
#[must_use]
pub fn encode_trade_message(trade: &Trade) -> Vec<u8> {
    let symbol = clamp_field(&trade.symbol, MAX_CHANNEL_LEN);
    let max_cond = usize::from(u8::MAX) - 27 - symbol.len();
    let condition = clamp_field(&trade.condition, max_cond);

    let total = 27 + symbol.len() + condition.len();
    let mut buf = Vec::with_capacity(total);
    buf.push(TRADE_TYPE);
    buf.push(len_u8(total));
    buf.push(len_u8(symbol.len()));
    buf.extend_from_slice(symbol);
    buf.push(trade.sub_provider.as_u8());
    buf.extend_from_slice(&utf16_be_unit(trade.market_center));
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(trade.price as f32).to_le_bytes());
    buf.extend_from_slice(&trade.size.to_le_bytes());
    buf.extend_from_slice(&trade.timestamp.to_le_bytes());
    buf.extend_from_slice(&trade.total_volume.to_le_bytes());
    buf.push(len_u8(condition.len()));
    buf.extend_from_slice(condition);
    buf
}

/// Encode a quote as one wire sub-message.
#[must_use]
pub fn encode_quote_message(quote: &Quote) -> Vec<u8> {
    let symbol = clamp_field(&quote.symbol, MAX_CHANNEL_LEN);
    let max_cond = usize::from(u8::MAX) - 23 - symbol.len();
    let condition = clamp_field(&quote.condition, max_cond);

    let total = 23 + symbol.len() + condition.len();
    let mut buf = Vec::with_capacity(total);
    buf.push(match quote.kind {
        QuoteKind::Ask => ASK_TYPE,
        QuoteKind::Bid => BID_TYPE,
    });
    buf.push(len_u8(total));
    buf.push(len_u8(symbol.len()));
    buf.extend_from_slice(symbol);
    buf.push(quote.sub_provider.as_u8());
    buf.extend_from_slice(&utf16_be_unit(quote.market_center));
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(quote.price as f32).to_le_bytes());
    buf.extend_from_slice(&quote.size.to_le_bytes());
    buf.extend_from_slice(&quote.timestamp.to_le_bytes());
    buf.push(len_u8(condition.len()));
    buf.extend_from_slice(condition);
    buf
}

/// Encode a full frame: count byte plus concatenated sub-messages.
///
/// At most 255 messages fit in one frame; extras are dropped with a warning.
#[must_use]
pub fn encode_frame(messages: &[StreamMessage]) -> Vec<u8> {
    let count = messages.len().min(usize::from(u8::MAX));
    if count < messages.len() {
        tracing::warn!(dropped = messages.len() - count, "frame overflow, dropping sub-messages");
    }

    let mut frame = vec![len_u8(count)];
    for message in &messages[..count] {
        match message {
            StreamMessage::Trade(trade) => frame.extend_from_slice(&encode_trade_message(trade)),
            StreamMessage::Quote(quote) => frame.extend_from_slice(&encode_quote_message(quote)),
        }
    }
    frame
}

fn clamp_field(text: &str, max: usize) -> &[u8] {
    let raw = text.as_bytes();
    &raw[..raw.len().min(max)]
}

fn len_u8(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}

fn utf16_be_unit(c: char) -> [u8; 2] {
    let mut units = [0u16; 2];
    let encoded = c.encode_utf16(&mut units);
    encoded[0].to_be_bytes()
}

//! Little-Endian Byte Readers
//!
//! Position-explicit readers over a byte buffer. Every reader takes the
//! buffer and an offset, returns the decoded value, and keeps no cursor
//! state; the frame codec owns all offset arithmetic.
//!
//! Reads whose range falls outside the buffer return `None`; the codec
//! treats that as a malformed frame.

/// Read an unsigned 32-bit little-endian integer at `offset`.
#[must_use]
pub fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a signed (two's-complement) 32-bit little-endian integer at `offset`.
#[must_use]
pub fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read an unsigned 64-bit little-endian integer at `offset`.
///
/// Values above 2^53 are preserved exactly; nanosecond timestamps depend
/// on this.
#[must_use]
pub fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Read an IEEE-754 binary32 little-endian float at `offset`, widened to
/// `f64`, rounded to four fractional digits, with negative results clamped
/// to zero.
///
/// The wire carries server-side rounding noise; the library contract is a
/// non-negative price with four digits of precision.
#[must_use]
pub fn read_f32(buf: &[u8], offset: usize) -> Option<f64> {
    let bytes = buf.get(offset..offset + 4)?;
    let raw = f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    let clamped = if raw.is_sign_negative() || raw < 0.0 {
        0.0
    } else {
        raw
    };
    Some((clamped * 10_000.0).round() / 10_000.0)
}

/// Decode the byte range `start..end` as UTF-8 text.
///
/// The wire guarantees ASCII in these positions; UTF-8 is accepted as a
/// safe superset. Invalid bytes yield `None`.
#[must_use]
pub fn read_ascii(buf: &[u8], start: usize, end: usize) -> Option<String> {
    let bytes = buf.get(start..end)?;
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        Err(e) => {
            tracing::debug!(start, end, error = %e, "non-UTF-8 bytes in text field");
            None
        }
    }
}

/// Decode the byte range `start..end` as UTF-16 big-endian text.
///
/// Used for the two-byte market-center code. The range length must be even.
#[must_use]
pub fn read_utf16_be(buf: &[u8], start: usize, end: usize) -> Option<String> {
    let bytes = buf.get(start..end)?;
    if bytes.len() % 2 != 0 {
        tracing::debug!(start, end, "odd-length UTF-16 field");
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Write the UTF-8 bytes of `text` into `dst` starting at `offset`,
/// truncating if the destination has insufficient capacity.
///
/// Returns the number of bytes written.
pub fn write_ascii(dst: &mut [u8], text: &str, offset: usize) -> usize {
    let Some(room) = dst.len().checked_sub(offset) else {
        return 0;
    };
    let raw = text.as_bytes();
    let n = raw.len().min(room);
    dst[offset..offset + n].copy_from_slice(&raw[..n]);
    n
}

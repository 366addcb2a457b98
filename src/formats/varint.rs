// UPS/BPS variable-length integer encoding.
//
// Base-128, little-endian: least-significant group first. The final byte has
// bit 7 set. After every non-final byte the multiplier is shifted by 7 and
// also added to the accumulator, which makes the encoding bijective: each
// value has exactly one byte representation and there is no padding form.

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one value starting at `*cursor`, advancing the cursor past the
/// consumed bytes.
///
/// Never fails. Running off the end of `buf` ends decoding with whatever has
/// been accumulated; callers bound-check the cursor before and after.
/// Arithmetic wraps so hostile input cannot panic.
#[inline]
pub fn decode(buf: &[u8], cursor: &mut usize) -> u64 {
    let mut value: u64 = 0;
    let mut multiplier: u64 = 1;

    while let Some(&byte) = buf.get(*cursor) {
        *cursor += 1;
        value = value.wrapping_add(u64::from(byte & 0x7F).wrapping_mul(multiplier));
        if byte & 0x80 != 0 {
            break;
        }
        multiplier = multiplier.wrapping_shl(7);
        value = value.wrapping_add(multiplier);
    }

    value
}

/// Decode a signed value: bit 0 is the sign (1 = negative), the remaining
/// bits are the magnitude.
#[inline]
pub fn decode_signed(buf: &[u8], cursor: &mut usize) -> i64 {
    split_signed(decode(buf, cursor))
}

/// Split a raw decoded value into its signed form.
#[inline]
pub fn split_signed(raw: u64) -> i64 {
    // `raw >> 1` always fits in i64.
    let magnitude = (raw >> 1) as i64;
    if raw & 1 != 0 { -magnitude } else { magnitude }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append the encoded form of `value` to `out`. Returns the number of bytes
/// written.
pub fn encode(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    loop {
        let low = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(low | 0x80);
            break;
        }
        out.push(low);
        value -= 1;
    }
    out.len() - start
}

/// Append a signed value (sign in bit 0).
pub fn encode_signed(value: i64, out: &mut Vec<u8>) -> usize {
    let raw = (value.unsigned_abs() << 1) | u64::from(value < 0);
    encode(raw, out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Compact code encoding for Coder numbers
//!
//! A number is scrambled with a bijection on `width` bits, then its
//! big-endian bytes are written with the URL-safe base64 alphabet without
//! padding:
//!
//! | Width  | Bytes | Characters |
//! |--------|-------|------------|
//! | 16 bit | 2     | 3          |
//! | 32 bit | 4     | 6          |
//! | 64 bit | 8     | 11         |
//!
//! The scramble multiplies by an odd constant modulo 2^width and xors a
//! mask. Both steps are invertible, so distinct numbers always give distinct
//! codes of the same width, and [`decode_code`] recovers the number.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tally_core::{TallyError, TallyResult};

/// Odd, so invertible modulo any power of two
const MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;
const MASK: u64 = 0x5DEE_CE66_D1CE_4E5B;

/// Bit width of the value behind a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeWidth {
    /// Numbers below 2^16, 3 characters
    Bits16,
    /// Numbers below 2^32, 6 characters
    Bits32,
    /// Any `u64`, 11 characters
    Bits64,
}

impl CodeWidth {
    /// Width in bits
    pub fn bits(&self) -> u32 {
        match self {
            CodeWidth::Bits16 => 16,
            CodeWidth::Bits32 => 32,
            CodeWidth::Bits64 => 64,
        }
    }

    /// Largest number that fits
    pub fn max_number(&self) -> u64 {
        match self {
            CodeWidth::Bits16 => u16::MAX as u64,
            CodeWidth::Bits32 => u32::MAX as u64,
            CodeWidth::Bits64 => u64::MAX,
        }
    }

    /// Length of an encoded code
    pub fn encoded_len(&self) -> usize {
        match self {
            CodeWidth::Bits16 => 3,
            CodeWidth::Bits32 => 6,
            CodeWidth::Bits64 => 11,
        }
    }

    fn byte_len(&self) -> usize {
        (self.bits() / 8) as usize
    }
}

fn scramble(number: u64, width: CodeWidth) -> u64 {
    let mask = width.max_number();
    (number.wrapping_mul(MULTIPLIER) & mask) ^ (MASK & mask)
}

fn unscramble(scrambled: u64, width: CodeWidth) -> u64 {
    let mask = width.max_number();
    (scrambled ^ (MASK & mask)).wrapping_mul(inverse(MULTIPLIER)) & mask
}

/// Multiplicative inverse modulo 2^64 (Newton iteration, doubles correct bits each step)
const fn inverse(odd: u64) -> u64 {
    let mut inv = odd;
    let mut i = 0;
    while i < 5 {
        inv = inv.wrapping_mul(2u64.wrapping_sub(odd.wrapping_mul(inv)));
        i += 1;
    }
    inv
}

/// Encode `number` as a code of `width`
///
/// Fails with `CapacityExceeded` if the number needs more bits.
pub fn encode_code(number: u64, width: CodeWidth) -> TallyResult<String> {
    if number > width.max_number() {
        return Err(TallyError::CapacityExceeded {
            width_bits: width.bits(),
            number,
        });
    }
    let bytes = scramble(number, width).to_be_bytes();
    Ok(URL_SAFE_NO_PAD.encode(&bytes[8 - width.byte_len()..]))
}

/// Recover the number behind a code of `width`
pub fn decode_code(code: &str, width: CodeWidth) -> TallyResult<u64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(code)
        .map_err(|e| TallyError::invalid_input(format!("malformed code '{}': {}", code, e)))?;
    if bytes.len() != width.byte_len() {
        return Err(TallyError::invalid_input(format!(
            "code '{}' is not a {}-bit code",
            code,
            width.bits()
        )));
    }
    let scrambled = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok(unscramble(scrambled, width))
}

//! Fixed-width floating-point codecs for the datapath boundary.
//!
//! The array exchanges values in three signed-mantissa formats. Unlike
//! IEEE-754, the mantissa carries the implicit leading 1 explicitly (for
//! normal values) and is stored in two's complement, so the hardware
//! multiplier handles both signs uniformly:
//!
//! ```text
//! SNFp16 (20 b): [ exp: 8 b biased-127  ][ mant: 12 b signed ]
//! SNFp32 (33 b): [ exp: 8 b biased-127  ][ mant: 25 b signed ]
//! SNFp64 (65 b): [ exp: 11 b biased-1023][ mant: 54 b signed ]
//! ```
//!
//! The mantissa occupies the low bits of the wire word. The 20- and 33-bit
//! formats are derived from the value narrowed to single precision. Only
//! normal values round-trip exactly; NaN and Inf are tolerated but not
//! modeled.

use byteorder::{ByteOrder, LittleEndian};

use super::bits::{bits_copy, bits_extract, mask128, mask64};
use crate::error::{Result, SimError};

/// Wire width of [`SNFp16`].
pub const NFP16_BITS: usize = 20;
/// Wire width of [`SNFp32`].
pub const NFP32_BITS: usize = 33;
/// Wire width of [`SNFp64`].
pub const NFP64_BITS: usize = 65;

/// Lane width used when packing [`SNFp64`] vectors into port words.
pub const LANE_BITS: usize = 65;

const NFP64_MANT_BITS: u32 = 54;
const NFP64_EXP_BITS: u32 = 11;

/// 20-bit signed-normal half/bfloat hybrid: 8-bit exponent, 12-bit signed
/// mantissa holding the top 10 single-precision fraction bits plus the
/// leading 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SNFp16(u32);

/// 33-bit signed-normal single: 8-bit exponent, 25-bit signed mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SNFp32(u64);

/// 65-bit signed-normal double: 11-bit exponent, 54-bit signed mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SNFp64(u128);

impl SNFp16 {
    /// Encode a host double, narrowed through single precision.
    pub fn from_f64(value: f64) -> Self {
        let bits = (value as f32).to_bits();
        let exp = (bits >> 23) & 0xFF;

        let mut mant = ((bits >> 13) & 0x3FF) as i32;
        if value.is_normal() {
            mant |= 1 << 10;
        }
        if bits & (1 << 31) != 0 {
            mant = -mant;
        }

        Self((exp << 12) | ((mant as u32) & 0xFFF))
    }

    /// Construct from a raw 20-bit wire word.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & ((1 << NFP16_BITS) - 1))
    }

    /// The raw 20-bit wire word.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Decode to a host double.
    pub fn to_f64(self) -> f64 {
        let mut mant = (self.0 & 0xFFF) as i32;
        let is_neg = mant & (1 << 11) != 0;
        if is_neg {
            mant |= !0i32 << 12;
            mant = -mant;
        }
        let exp = (self.0 >> 12) & 0xFF;

        let mut bits: u32 = u32::from(is_neg);
        bits = (bits << 8) | exp;
        // The 10 fraction bits return to the top of the single-precision
        // mantissa; the explicit leading 1 lands on bit 23 and is dropped
        // by the mask.
        bits = (bits << 23) | (((mant as u32) << 13) & 0x007F_FFFF);

        f32::from_bits(bits) as f64
    }
}

impl SNFp32 {
    /// Encode a host double, narrowed through single precision.
    pub fn from_f64(value: f64) -> Self {
        let bits = (value as f32).to_bits();
        let exp = ((bits >> 23) & 0xFF) as u64;

        let mut mant = (bits & 0x007F_FFFF) as i32;
        if value.is_normal() {
            mant |= 1 << 23;
        }
        if bits & (1 << 31) != 0 {
            mant = -mant;
        }

        Self((exp << 25) | (u64::from(mant as u32) & mask64(25)))
    }

    /// Construct from a raw 33-bit wire word.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw & mask64(NFP32_BITS as u32))
    }

    /// The raw 33-bit wire word.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Decode to a host double.
    pub fn to_f64(self) -> f64 {
        let mut mant = (self.0 & mask64(25)) as u32 as i32;
        let is_neg = mant & (1 << 24) != 0;
        if is_neg {
            mant |= !0i32 << 25;
            mant = -mant;
        }
        let exp = ((self.0 >> 25) & 0xFF) as u32;

        let mut bits: u32 = u32::from(is_neg);
        bits = (bits << 8) | exp;
        bits = (bits << 23) | ((mant as u32) & 0x007F_FFFF);

        f32::from_bits(bits) as f64
    }
}

impl SNFp64 {
    /// Encode a host double.
    pub fn from_f64(value: f64) -> Self {
        let bits = value.to_bits();
        let exp = (bits >> 52) & mask64(NFP64_EXP_BITS);

        let mut mant = (bits & mask64(52)) as i64;
        if value.is_normal() {
            mant |= 1 << 52;
        }
        if bits & (1 << 63) != 0 {
            mant = -mant;
        }

        Self((u128::from(exp) << NFP64_MANT_BITS) | (u128::from(mant as u64) & mask128(NFP64_MANT_BITS)))
    }

    /// Construct from a raw 65-bit wire word.
    pub fn from_raw(raw: u128) -> Self {
        Self(raw & mask128(NFP64_BITS as u32))
    }

    /// The raw 65-bit wire word.
    pub fn raw(self) -> u128 {
        self.0
    }

    /// Decode to a host double.
    pub fn to_f64(self) -> f64 {
        let mut mant = (self.0 & mask128(NFP64_MANT_BITS)) as u64 as i64;
        let is_neg = mant & (1 << 53) != 0;
        if is_neg {
            mant |= !0i64 << NFP64_MANT_BITS;
            mant = -mant;
        }
        let exp = ((self.0 >> NFP64_MANT_BITS) as u64) & mask64(NFP64_EXP_BITS);

        let mut bits: u64 = u64::from(is_neg);
        bits = (bits << 11) | exp;
        bits = (bits << 52) | ((mant as u64) & mask64(52));

        f64::from_bits(bits)
    }
}

/// Pack a value into lane `pos` of a wide port word.
///
/// Only the 65-bit lane format is implemented; other widths return
/// [`SimError::UnsupportedWidth`].
pub fn elem_set(buf: &mut [u8], n_bits_elem: usize, pos: usize, value: f64) -> Result<()> {
    if n_bits_elem != LANE_BITS {
        return Err(SimError::UnsupportedWidth { width: n_bits_elem });
    }
    let end_bit = (pos + 1) * n_bits_elem;
    if end_bit.div_ceil(8) > buf.len() {
        return Err(SimError::LaneOutOfRange {
            pos,
            have: buf.len(),
        });
    }

    let enc = SNFp64::from_f64(value);
    let mant = (enc.raw() & mask128(NFP64_MANT_BITS)) as u64;
    let exp = ((enc.raw() >> NFP64_MANT_BITS) as u64) & mask64(NFP64_EXP_BITS);

    let mut staged = [0u8; 8];
    LittleEndian::write_u64(&mut staged, mant);
    bits_copy(buf, pos * n_bits_elem, &staged, NFP64_MANT_BITS as usize)?;
    LittleEndian::write_u64(&mut staged, exp);
    bits_copy(
        buf,
        pos * n_bits_elem + NFP64_MANT_BITS as usize,
        &staged,
        NFP64_EXP_BITS as usize,
    )?;

    Ok(())
}

/// Unpack the value in lane `pos` of a wide port word.
pub fn elem_get(buf: &[u8], n_bits_elem: usize, pos: usize) -> Result<f64> {
    if n_bits_elem != LANE_BITS {
        return Err(SimError::UnsupportedWidth { width: n_bits_elem });
    }
    let end_bit = (pos + 1) * n_bits_elem;
    if end_bit.div_ceil(8) > buf.len() {
        return Err(SimError::LaneOutOfRange {
            pos,
            have: buf.len(),
        });
    }

    let raw = bits_extract(buf, pos * n_bits_elem, n_bits_elem)?;
    Ok(SNFp64::from_raw(raw).to_f64())
}

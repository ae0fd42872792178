//! The corruption primitive.

use super::FiCorruption;
use crate::error::{Result, SimError};

/// Apply a single-bit corruption to a host double viewed as a `u64`.
///
/// `FiCorruption::None` passes the value through unchanged.
pub fn corrupt(input: f64, corruption: FiCorruption, bit_pos: u8) -> Result<f64> {
    if bit_pos > 63 {
        return Err(SimError::BitOutOfRange { bit: bit_pos });
    }

    let bits = input.to_bits();
    let out = match corruption {
        FiCorruption::None => return Ok(input),
        FiCorruption::Flip => bits ^ (1u64 << bit_pos),
        FiCorruption::StuckHigh => bits | (1u64 << bit_pos),
        FiCorruption::StuckLow => bits & !(1u64 << bit_pos),
    };

    let out = f64::from_bits(out);
    log::debug!("corrupting {input:e} -> {out:e} (bit {bit_pos}, {corruption:?})");

    Ok(out)
}

//! Numeric plumbing at the datapath boundary.
//!
//! The accelerator exchanges values in custom fixed-width floating-point
//! formats with signed mantissas, packed into wide port words at arbitrary
//! bit offsets. This module provides:
//!
//! - [`bits`]: arbitrary-width bit-field copy/extract over byte buffers
//! - [`fixed_float`]: the 20/33/65-bit signed-mantissa codecs and the
//!   packed-lane accessors built on top of them

pub mod bits;
pub mod fixed_float;

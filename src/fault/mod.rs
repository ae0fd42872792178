//! Fault model: typed fault records for the C-model and the RTL co-sim.
//!
//! All selectors are sum types with a `None` variant that exists only for
//! the "unset" state; `fi_set_*` rejects `None`-valued selectors. The
//! string forms accepted by [`FromStr`] are the closed sets used by the
//! host's fault-campaign environment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod corrupt;
pub mod injector;

pub use corrupt::corrupt;
pub use injector::{FaultSite, NetlistInjector, SyntheticNetlist};

/// Maximum module-instance-chain depth kept inline.
pub const INSTANCE_CHAIN_DEPTH: usize = 8;

/// How long a fault stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FiMode {
    /// No fault set.
    #[default]
    None,
    /// Active for exactly one cycle.
    Transient,
    /// Active on every cycle.
    Permanent,
}

/// What the fault does to the targeted bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FiCorruption {
    /// No corruption.
    #[default]
    None,
    /// Force the bit to 1.
    StuckHigh,
    /// Force the bit to 0.
    StuckLow,
    /// Invert the bit.
    Flip,
}

/// Which bit range the fault may land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FiBits {
    /// Unset.
    #[default]
    None,
    /// Any of the 64 bits.
    Everywhere,
    /// Mantissa bits only (0..52).
    Mantissa,
}

/// Computation site targeted by a C-model fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CsimPlace {
    /// Unset.
    #[default]
    None,
    /// Draw a concrete site at fault-set time.
    Everywhere,
    /// One of the three operand inputs, before the multiply.
    Inputs,
    /// The product of one multiplier.
    Multipliers,
    /// The sum of one accumulator adder.
    AccAdders,
    /// The final column adder output.
    ColumnAdders,
}

/// A fully resolved C-model fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCsim {
    /// Target computation site.
    pub place: CsimPlace,
    /// Corruption applied at the site.
    pub corruption: FiCorruption,
    /// Transient or permanent.
    pub mode: FiMode,
    /// Bit position within the 64-bit value.
    pub bit_pos: u8,
    /// Target SA row.
    pub row: u8,
}

impl Default for FaultCsim {
    fn default() -> Self {
        Self {
            place: CsimPlace::None,
            corruption: FiCorruption::None,
            mode: FiMode::None,
            bit_pos: u8::MAX,
            row: 0,
        }
    }
}

impl FaultCsim {
    /// True once the record has been populated by `fi_set_csim`.
    pub fn is_set(&self) -> bool {
        self.place != CsimPlace::None
    }
}

impl fmt::Display for FaultCsim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} {:?} row {} bit {}",
            self.place, self.corruption, self.mode, self.row, self.bit_pos
        )
    }
}

/// A fully resolved RTL (netlist) fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRtl {
    /// Instance path from the top module to the faulted module.
    pub module_instance_chain: SmallVec<[u16; INSTANCE_CHAIN_DEPTH]>,
    /// Identifier of the faulted assign within that module.
    pub assign_uuid: u32,
    /// Bit of the assigned signal that is forced.
    pub bit_pos: u16,
    /// Transient or permanent.
    pub mode: FiMode,
}

impl Default for FaultRtl {
    fn default() -> Self {
        Self {
            module_instance_chain: SmallVec::new(),
            assign_uuid: 0,
            bit_pos: u16::MAX,
            mode: FiMode::None,
        }
    }
}

impl FaultRtl {
    /// True once the record has been populated by `fi_set_rtl`.
    pub fn is_set(&self) -> bool {
        self.mode != FiMode::None
    }
}

impl FromStr for FiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "transient" => Ok(Self::Transient),
            "permanent" => Ok(Self::Permanent),
            other => Err(format!("unknown fault mode `{other}`")),
        }
    }
}

impl FromStr for FiCorruption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "stuck-high" => Ok(Self::StuckHigh),
            "stuck-low" => Ok(Self::StuckLow),
            "flip" => Ok(Self::Flip),
            other => Err(format!("unknown corruption `{other}`")),
        }
    }
}

impl FromStr for FiBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "everywhere" => Ok(Self::Everywhere),
            "mantissa" => Ok(Self::Mantissa),
            other => Err(format!("unknown bit range `{other}`")),
        }
    }
}

impl FromStr for CsimPlace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "everywhere" => Ok(Self::Everywhere),
            "inputs" => Ok(Self::Inputs),
            "multipliers" => Ok(Self::Multipliers),
            "acc-adders" => Ok(Self::AccAdders),
            "column-adders" => Ok(Self::ColumnAdders),
            other => Err(format!("unknown fault place `{other}`")),
        }
    }
}

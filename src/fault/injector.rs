//! Netlist fault-injector seam.
//!
//! In an RTL co-simulation the fault sites come from a netlist analysis
//! tool that knows every assign in the synthesized design. That tool is an
//! external collaborator; this module defines the narrow contract the
//! simulator consumes and a synthetic catalog that stands in for it when
//! no netlist is attached.

use smallvec::SmallVec;

use super::INSTANCE_CHAIN_DEPTH;
use crate::device::config::SaConfig;
use crate::error::{Result, SimError};
use crate::rng::SimRng;

/// One injectable site in the (real or synthetic) netlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSite {
    /// Instance path from the top module down to the faulted module.
    pub module_instance_chain: SmallVec<[u16; INSTANCE_CHAIN_DEPTH]>,
    /// Identifier of the faulted assign within that module.
    pub assign_uuid: u32,
    /// Width of the assigned signal in bits.
    pub signal_width: usize,
}

/// Source of injectable netlist fault sites.
pub trait NetlistInjector {
    /// Draw a uniformly random fault site.
    fn random_fault(&mut self, rng: &mut SimRng) -> Result<FaultSite>;
}

/// Catalog-backed stand-in for the netlist fault injector.
///
/// One site per FMA stage per SA row, plus one column-adder site per row.
/// The assign UUID encodes the SA row in bits 8.. and the unit within the
/// row in bits 0..8 (`0..Kmma` = FMA stage, `Kmma` = column adder); the
/// behavioral array relies on that encoding to route a forced bit.
#[derive(Debug, Clone)]
pub struct SyntheticNetlist {
    sites: Vec<FaultSite>,
}

/// Instance number of the FMA module in the synthetic hierarchy.
const INST_FMA: u16 = 1;
/// Instance number of the column adder in the synthetic hierarchy.
const INST_COLUMN_ADDER: u16 = 2;

impl SyntheticNetlist {
    /// Build the catalog for an array configuration.
    pub fn new(config: &SaConfig) -> Self {
        let mut sites = Vec::with_capacity(config.mmma * (config.kmma + 1));

        for row in 0..config.mmma as u16 {
            for k in 0..config.kmma as u16 {
                sites.push(FaultSite {
                    module_instance_chain: SmallVec::from_slice(&[INST_FMA, row, k]),
                    assign_uuid: (u32::from(row) << 8) | u32::from(k),
                    signal_width: 65,
                });
            }
            sites.push(FaultSite {
                module_instance_chain: SmallVec::from_slice(&[INST_COLUMN_ADDER, row]),
                assign_uuid: (u32::from(row) << 8) | config.kmma as u32,
                signal_width: 65,
            });
        }

        Self { sites }
    }

    /// Number of sites in the catalog.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

impl NetlistInjector for SyntheticNetlist {
    fn random_fault(&mut self, rng: &mut SimRng) -> Result<FaultSite> {
        if self.sites.is_empty() {
            return Err(SimError::NoFaultSites);
        }
        Ok(self.sites[rng.pick(self.sites.len())].clone())
    }
}

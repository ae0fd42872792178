//! Behavioral implementation of the port trait.
//!
//! Reproduces the port-observable behavior of the RTL without a netlist:
//! a column computation starts when its accumulator lane is loaded,
//! consumes the k-th product exactly `(k/2)*FmaCycles + k%2` half-cycles
//! later (each row is two phase-shifted FMAs, hence the even/odd
//! interleave), and lands on the output lanes `JobCycleOutputStart`
//! half-cycles after the accumulator load. Left-matrix values are latched
//! and persist across a job's columns.
//!
//! The fault signal forces one bit of one row's column accumulator to 1
//! while asserted, routed by the assign UUID of the synthetic netlist
//! catalog. The error flag models the RTL's residue check: it is raised on
//! any half-cycle where the forced bit actually changed a value.

use std::collections::VecDeque;

use super::config::SaConfig;
use super::port::SystolicPort;
use crate::error::{Result, SimError};
use crate::numeric::bits::bits_extract;
use crate::numeric::fixed_float::{elem_set, SNFp64, LANE_BITS};

/// One in-flight column computation.
#[derive(Debug, Clone)]
struct ColumnSlot {
    /// Half-cycle at which the accumulator lanes were loaded.
    start: u64,
    /// Running per-row sums.
    sum: Vec<f64>,
}

/// Asserted fault signal.
#[derive(Debug, Clone, Copy)]
struct FaultSignal {
    assign_uuid: u32,
    bit_pos: u16,
}

/// Behavioral systolic array.
#[derive(Debug)]
pub struct BehavioralArray {
    config: SaConfig,
    /// Packed output port: one 65-bit lane per row, word-rounded storage.
    out_port: Vec<u8>,
    /// Half-cycles ticked so far.
    cycle: u64,
    /// Latched left-matrix values, `[row][k]`.
    left: Vec<Vec<f64>>,
    /// Latched right-matrix values, `[k]`.
    right: Vec<f64>,
    /// Accumulator lanes written since the last tick.
    pending_acc: Vec<Option<f64>>,
    columns: VecDeque<ColumnSlot>,
    fault: Option<FaultSignal>,
    error_flag: bool,
}

impl BehavioralArray {
    /// Build an array with all `Mmma` rows instantiated.
    pub fn new(config: SaConfig) -> Self {
        Self::with_rows(config, config.mmma)
    }

    /// Build an array with only the first `rows` SA rows instantiated.
    ///
    /// The I/O driver completes the remaining rows with the C-model, the
    /// same way a partial netlist build is handled.
    pub fn with_rows(config: SaConfig, rows: usize) -> Self {
        let storage_words = (rows * LANE_BITS).div_ceil(32);
        Self {
            config,
            out_port: vec![0u8; storage_words * 4],
            cycle: 0,
            left: vec![vec![0.0; config.kmma]; rows],
            right: vec![0.0; config.kmma],
            pending_acc: vec![None; rows],
            columns: VecDeque::new(),
            fault: None,
            error_flag: false,
        }
    }

    /// Half-cycle offset at which a column consumes its k-th product.
    fn stage_offset(&self, k: usize) -> usize {
        (k / 2) * self.config.fma_cycles + k % 2
    }

    /// Half-cycle offset at which the column adder holds the finished sum.
    fn column_adder_offset(&self) -> usize {
        self.stage_offset(self.config.kmma - 1) + 1
    }

    fn apply_fault(&mut self, at_cycle: u64) {
        let Some(sig) = self.fault else {
            return;
        };
        let rows = self.left.len();
        let row = ((sig.assign_uuid >> 8) as usize) % rows;
        let unit = (sig.assign_uuid & 0xFF) as usize;
        let offset = if unit < self.config.kmma {
            self.stage_offset(unit)
        } else {
            self.column_adder_offset()
        };

        let Some(start) = at_cycle.checked_sub(offset as u64) else {
            return;
        };
        if let Some(slot) = self.columns.iter_mut().find(|s| s.start == start) {
            let old = slot.sum[row].to_bits();
            let forced = old | (1u64 << (sig.bit_pos % 64));
            if forced != old {
                slot.sum[row] = f64::from_bits(forced);
                self.error_flag = true;
                log::debug!(
                    "cycle {at_cycle}: fault signal forced bit {} of row {row}",
                    sig.bit_pos % 64
                );
            }
        }
    }
}

impl SystolicPort for BehavioralArray {
    fn rows(&self) -> usize {
        // Derived from the output port storage, like the RTL build.
        self.out_port.len() * 8 / LANE_BITS
    }

    fn set_left(&mut self, m: usize, k: usize, value: SNFp64) -> Result<()> {
        let rows = self.left.len();
        if m >= rows {
            return Err(SimError::PortIndexOutOfRange {
                port: "multLeft",
                index: m,
                limit: rows,
            });
        }
        if k >= self.config.kmma {
            return Err(SimError::PortIndexOutOfRange {
                port: "multLeft",
                index: k,
                limit: self.config.kmma,
            });
        }
        self.left[m][k] = value.to_f64();
        Ok(())
    }

    fn set_right(&mut self, k: usize, value: SNFp64) -> Result<()> {
        if k >= self.config.kmma {
            return Err(SimError::PortIndexOutOfRange {
                port: "multRight",
                index: k,
                limit: self.config.kmma,
            });
        }
        self.right[k] = value.to_f64();
        Ok(())
    }

    fn set_acc(&mut self, m: usize, value: SNFp64) -> Result<()> {
        if m >= self.pending_acc.len() {
            return Err(SimError::PortIndexOutOfRange {
                port: "acc",
                index: m,
                limit: self.pending_acc.len(),
            });
        }
        self.pending_acc[m] = Some(value.to_f64());
        Ok(())
    }

    fn read_out(&self, m: usize) -> SNFp64 {
        bits_extract(&self.out_port, m * LANE_BITS, LANE_BITS)
            .map(SNFp64::from_raw)
            .unwrap_or_default()
    }

    fn set_fault_signal(&mut self, _module_instance_chain: &[u16], assign_uuid: u32, bit_pos: u16) {
        self.fault = Some(FaultSignal {
            assign_uuid,
            bit_pos,
        });
    }

    fn clear_fault_signal(&mut self) {
        self.fault = None;
    }

    fn tick(&mut self, _clk_high: bool) {
        let c = self.cycle;
        let rows = self.left.len();

        // A column computation starts on the cycle its accumulator lanes
        // were loaded.
        if self.pending_acc.iter().any(Option::is_some) {
            let sum = self.pending_acc.iter().map(|a| a.unwrap_or(0.0)).collect();
            self.columns.push_back(ColumnSlot { start: c, sum });
            self.pending_acc.fill(None);
        }

        // Each column consumes the k-th product at its scheduled offset.
        for k in 0..self.config.kmma {
            let Some(start) = c.checked_sub(self.stage_offset(k) as u64) else {
                continue;
            };
            if let Some(slot) = self.columns.iter_mut().find(|s| s.start == start) {
                for m in 0..rows {
                    slot.sum[m] += self.left[m][k] * self.right[k];
                }
            }
        }

        self.error_flag = false;
        self.apply_fault(c);

        // Drop columns whose output window has passed.
        let latency = self.config.job_cycle_output_start() as u64;
        while let Some(front) = self.columns.front() {
            if front.start + latency < c {
                self.columns.pop_front();
            } else {
                break;
            }
        }

        self.cycle = c + 1;

        // Refresh the output lanes for the column whose window opens now.
        if let Some(start) = self.cycle.checked_sub(latency) {
            if let Some(slot) = self.columns.iter().find(|s| s.start == start) {
                for m in 0..rows {
                    if let Err(err) = elem_set(&mut self.out_port, LANE_BITS, m, slot.sum[m]) {
                        log::error!("output lane {m} write failed: {err}");
                    }
                }
            }
        }
    }

    fn read_error_flag(&self) -> bool {
        self.error_flag
    }
}

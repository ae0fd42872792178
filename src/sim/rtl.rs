//! RTL-style execution orchestrator.
//!
//! Drives the queue through the port interface one half-cycle at a time,
//! asserting the fault signal on the chosen cycle. Two fast paths keep
//! transient fault campaigns cheap: jobs that retire before the fault can
//! fire are fast-forwarded through the C-model, and once the fault has
//! flushed out of the pipe the remainder is finished there too.

use super::job;
use super::SystolicArraySim;
use crate::device::port::SystolicPort;
use crate::error::{Result, SimError};
use crate::fault::FiMode;

impl<P: SystolicPort> SystolicArraySim<P> {
    /// Drain the queue through the port interface.
    ///
    /// `fast_transient` skips cycle-level simulation wherever a transient
    /// fault cannot influence the result. `fast_transient_test` goes
    /// through all the motions of a transient injection without actually
    /// asserting the fault signal.
    pub fn exec_rtl(&mut self, fast_transient: bool, fast_transient_test: bool) -> Result<()> {
        if let Some((earlier, later)) =
            job::read_before_write(&self.queue, self.config.jobs_in_pipe())
        {
            return Err(SimError::ReadBeforeWrite { earlier, later });
        }

        if self.fault_rtl.mode == FiMode::Permanent {
            self.port.set_fault_signal(
                &self.fault_rtl.module_instance_chain,
                self.fault_rtl.assign_uuid,
                self.fault_rtl.bit_pos,
            );
        } else {
            self.port.clear_fault_signal();
        }

        // Fast-forward jobs that retire before a transient fault can fire.
        if self.fault_rtl.mode == FiMode::Transient && fast_transient {
            let done = self.config.job_cycle_done();
            let jobs_before = if self.fault_rtl_trans_cycle > done {
                self.config
                    .jobs_done_in_cycles(self.fault_rtl_trans_cycle - done)
            } else {
                0
            };
            if jobs_before > 0 {
                self.exec_csim(jobs_before)?;
                for entry in &mut self.queue {
                    entry.job_cycle = 0;
                }
                self.cycle_cnt = self.config.cycles_required(jobs_before);
                log::debug!(
                    "cycle {}: fast transient, skipped {jobs_before} leading jobs",
                    self.cycle_cnt
                );
            }
        }

        if self.port.rows() != self.config.mmma {
            log::debug!(
                "simulating {} of {} SA rows",
                self.port.rows(),
                self.config.mmma
            );
        }

        let mut clk_high = true;
        while !self.queue.is_empty() {
            clk_high = !clk_high;
            self.io_set(clk_high)?;

            if self.fault_rtl.mode == FiMode::Transient {
                if self.cycle_cnt == self.fault_rtl_trans_cycle {
                    log::debug!("cycle {}: asserting transient fault", self.cycle_cnt);
                    if !fast_transient_test {
                        self.port.set_fault_signal(
                            &self.fault_rtl.module_instance_chain,
                            self.fault_rtl.assign_uuid,
                            self.fault_rtl.bit_pos,
                        );
                    }
                } else {
                    self.port.clear_fault_signal();
                }
            }

            self.cycle_cnt += 1;
            self.port.tick(clk_high);

            if self.port.read_error_flag() {
                if !self.die_error {
                    self.diag.soft_error("array error flag raised");
                }
                self.die_error = true;
            }

            // Once a transient fault has flushed out of the pipe without
            // touching the head job's outputs, the rest is fault-free.
            if self.fault_rtl.mode == FiMode::Transient
                && fast_transient
                && self.cycle_cnt > self.fault_rtl_trans_cycle + self.config.job_cycle_done() + 1
                && self
                    .queue
                    .front()
                    .is_some_and(|e| e.job_cycle < self.config.job_cycle_output_start())
            {
                log::debug!(
                    "cycle {}: transient fault flushed, finishing with the C-model",
                    self.cycle_cnt
                );
                for entry in &mut self.queue {
                    entry.job_cycle = 0;
                }
                return self.exec_csim(usize::MAX);
            }
        }

        Ok(())
    }
}

//! Behavioral compute engine (the C-model).
//!
//! One engine step computes one output column of the head job: the plain
//! rows with a straight triple loop, and the fault-target row through
//! [`SystolicArraySim::row_csim`] so a fault can be injected into one of
//! its summation terms. The per-job cycle counter doubles as the column
//! index here.

use super::SystolicArraySim;
use crate::device::port::SystolicPort;
use crate::error::Result;
use crate::fault::{corrupt, CsimPlace, FaultCsim, FiMode};

impl<P: SystolicPort> SystolicArraySim<P> {
    /// Drain up to `max_jobs` queued jobs through the C-model, mutating
    /// their output regions in place.
    pub fn exec_csim(&mut self, max_jobs: usize) -> Result<()> {
        let orig_jobs = self.queue.len();
        let (mmma, kmma, nmma) = (self.config.mmma, self.config.kmma, self.config.nmma);

        while !self.queue.is_empty() && orig_jobs - self.queue.len() < max_jobs {
            let Some(front) = self.queue.front() else {
                break;
            };
            let mma = front.job;
            let col = front.job_cycle;
            let fault_row = self.fault_csim.row as usize;

            // Gather this column's operands; the write-back below may
            // target the same buffer as an input.
            let mut a_rows = vec![0.0; mmma * kmma];
            let mut b_col = vec![0.0; kmma];
            let mut c_col = vec![0.0; mmma];
            {
                let a = self.pool.get(mma.mat_a.mat)?;
                let b = self.pool.get(mma.mat_b.mat)?;
                let c = self.pool.get(mma.mat_c.mat)?;
                for row in 0..mmma {
                    for k in 0..kmma {
                        a_rows[row * kmma + k] = a[mma.mat_a.index(row, k)];
                    }
                    c_col[row] = c[mma.mat_c.index(row, col)];
                }
                for k in 0..kmma {
                    b_col[k] = b[mma.mat_b.index(k, col)];
                }
            }

            for row in 0..mmma {
                if row == fault_row {
                    continue;
                }
                for k in 0..kmma {
                    c_col[row] += a_rows[row * kmma + k] * b_col[k];
                }
            }

            let fault_active = self.cycle_cnt == self.fault_csim_trans_cycle
                || self.fault_csim.mode == FiMode::Permanent;
            let fault = fault_active.then_some(self.fault_csim);

            let mut out = c_col[fault_row];
            self.row_csim(
                &mut out,
                &a_rows[fault_row * kmma..(fault_row + 1) * kmma],
                &b_col,
                fault.as_ref(),
            )?;
            c_col[fault_row] = out;

            {
                let c = self.pool.get_mut(mma.mat_c.mat)?;
                for (row, value) in c_col.iter().enumerate() {
                    c[mma.mat_c.index(row, col)] = *value;
                }
            }

            self.cycle_cnt += 1;
            if let Some(front) = self.queue.front_mut() {
                front.job_cycle += 1;
                if front.job_cycle >= nmma {
                    self.queue.pop_front();
                }
            }
        }

        Ok(())
    }

    /// One row contribution: `out += sum_k a[k] * b[k]`, with an optional
    /// fault applied at a randomly chosen summation term.
    fn row_csim(
        &mut self,
        out: &mut f64,
        a: &[f64],
        b: &[f64],
        fault: Option<&FaultCsim>,
    ) -> Result<()> {
        // Drawn on every invocation so a run's random stream does not
        // depend on whether a fault is armed.
        let k_fault = self.rng.pick(self.config.kmma);

        for k in 0..self.config.kmma {
            match fault {
                Some(f) if k == k_fault => {
                    let mut acc_in = *out;
                    let mut a_in = a[k];
                    let mut b_in = b[k];
                    if f.place == CsimPlace::Inputs {
                        match self.rng.pick(3) {
                            0 => acc_in = corrupt(acc_in, f.corruption, f.bit_pos)?,
                            1 => a_in = corrupt(a_in, f.corruption, f.bit_pos)?,
                            _ => b_in = corrupt(b_in, f.corruption, f.bit_pos)?,
                        }
                    }

                    let mut mul = a_in * b_in;
                    if f.place == CsimPlace::Multipliers {
                        mul = corrupt(mul, f.corruption, f.bit_pos)?;
                    }

                    let mut acc = mul + acc_in;
                    if f.place == CsimPlace::AccAdders {
                        acc = corrupt(acc, f.corruption, f.bit_pos)?;
                    }

                    *out = acc;
                }
                _ => *out += a[k] * b[k],
            }
        }

        if let Some(f) = fault {
            if f.place == CsimPlace::ColumnAdders {
                *out = corrupt(*out, f.corruption, f.bit_pos)?;
            }
        }

        Ok(())
    }
}

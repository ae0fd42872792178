//! Per-cycle I/O driver.
//!
//! Runs on every half-cycle of an RTL-style execution and maps each
//! serviced job's cycle counter to port activity:
//!
//! ```text
//! Cycle 0          : k = 0, n = 0
//! Cycle 1          : k = 1, n = 0
//! Cycle 2          : k = 0, n = 1
//! Cycle 3          : k = 1, n = 1
//! ...
//! Cycle FmaCycles  : k = 2, n = 0
//! Cycle FmaCycles+1: k = 3, n = 0
//! Cycle FmaCycles+2: k = 2, n = 1
//! ...
//! ```
//!
//! The next k-value need only be presented once the previous FMA output
//! has drained; each SA row is two independent phase-shifted FMAs, hence
//! the even/odd-k interleave.

use super::SystolicArraySim;
use crate::device::port::SystolicPort;
use crate::error::{Result, SimError};
use crate::numeric::fixed_float::SNFp64;

impl<P: SystolicPort> SystolicArraySim<P> {
    /// Drive one half-cycle of port activity for every serviced job, then
    /// retire the head job if it has read its last output.
    pub(crate) fn io_set(&mut self, _clk_high: bool) -> Result<()> {
        if self.queue.is_empty() {
            return Err(SimError::QueueEmpty);
        }

        let config = self.config;
        let fma = config.fma_cycles;
        let kmma = config.kmma;
        let nmma = config.nmma;
        let out_start = config.job_cycle_output_start();
        let done = config.job_cycle_done();
        let rows_rtl = self.port.rows();

        // The head is always serviced; a follower joins once its
        // predecessor has cleared the first pipeline stage.
        let mut concurrent = 1;
        while concurrent < self.queue.len()
            && self.queue[concurrent - 1].job_cycle > config.job_cycle_passed_first_stage()
        {
            concurrent += 1;
        }

        for idx in 0..concurrent {
            let entry = self.queue[idx];
            let jc = entry.job_cycle;
            let mma = entry.job;

            let mut left_writes: Vec<(usize, usize, f64)> = Vec::new();
            let mut right_writes: Vec<(usize, f64)> = Vec::new();
            let mut acc_writes: Vec<(usize, f64)> = Vec::new();
            {
                let a = self.pool.get(mma.mat_a.mat)?;
                let b = self.pool.get(mma.mat_b.mat)?;
                let c = self.pool.get(mma.mat_c.mat)?;

                // Left matrix: constant over n, so one load per k.
                let even_k = jc % fma == 0;
                let odd_k = jc > 0 && (jc - 1) % fma == 0;
                if even_k || odd_k {
                    let k = 2 * (jc / fma) + usize::from(!even_k);
                    if k < kmma {
                        for m in 0..rows_rtl {
                            left_writes.push((m, k, a[mma.mat_a.index(m, k)]));
                        }
                    }
                }

                // Right matrix: shared across columns in time, 2-cycle
                // stride between successive n.
                let n_cnt = (jc / 2 + 1).min(nmma);
                for n in 0..n_cnt {
                    let njc = jc - 2 * n;
                    let even_k = njc % fma == 0;
                    let odd_k = njc > 0 && (njc - 1) % fma == 0;
                    if even_k || odd_k {
                        let k = 2 * (njc / fma) + usize::from(!even_k);
                        if k < kmma {
                            right_writes.push((k, b[mma.mat_b.index(k, n)]));
                        }
                    }
                }

                // Accumulator: a new column starts every other cycle.
                if jc % 2 == 0 {
                    let n = jc / 2;
                    if n < nmma {
                        for m in 0..rows_rtl {
                            acc_writes.push((m, c[mma.mat_c.index(m, n)]));
                        }
                    }
                }
            }

            for (m, k, v) in left_writes {
                self.port.set_left(m, k, SNFp64::from_f64(v))?;
            }
            for (k, v) in right_writes {
                self.port.set_right(k, SNFp64::from_f64(v))?;
            }
            for (m, v) in acc_writes {
                self.port.set_acc(m, SNFp64::from_f64(v))?;
            }

            // Gather output.
            if jc >= out_start {
                let offset = jc - out_start;
                if offset % 2 == 0 {
                    let n = offset / 2;
                    if n >= nmma {
                        return Err(SimError::OutputOverrun { n, limit: nmma });
                    }
                    let outs: Vec<f64> =
                        (0..rows_rtl).map(|m| self.port.read_out(m).to_f64()).collect();
                    let c = self.pool.get_mut(mma.mat_c.mat)?;
                    for (m, v) in outs.into_iter().enumerate() {
                        c[mma.mat_c.index(m, n)] = v;
                    }
                }
            }
        }

        // Retirement.
        let mut popped = false;
        let front_cycle = self.queue[0].job_cycle;
        if front_cycle == done {
            if rows_rtl != config.mmma {
                self.complete_missing_rows(rows_rtl)?;
            }
            self.queue.pop_front();
            popped = true;
        } else if front_cycle > done {
            return Err(SimError::JobOverrun {
                cycle: front_cycle,
                limit: done,
            });
        }

        let serviced = if popped { concurrent - 1 } else { concurrent };
        for idx in 0..serviced.min(self.queue.len()) {
            self.queue[idx].job_cycle += 1;
        }

        Ok(())
    }

    /// When the port build instantiates fewer SA rows than `Mmma`, the
    /// remaining rows of the retiring job are computed directly with the
    /// unfaulted C-model.
    fn complete_missing_rows(&mut self, rows_rtl: usize) -> Result<()> {
        let Some(front) = self.queue.front() else {
            return Ok(());
        };
        let mma = front.job;
        let (mmma, kmma, nmma) = (self.config.mmma, self.config.kmma, self.config.nmma);

        let mut updates: Vec<(usize, f64)> = Vec::new();
        {
            let a = self.pool.get(mma.mat_a.mat)?;
            let b = self.pool.get(mma.mat_b.mat)?;
            let c = self.pool.get(mma.mat_c.mat)?;
            for row in rows_rtl..mmma {
                for col in 0..nmma {
                    let mut acc = c[mma.mat_c.index(row, col)];
                    for k in 0..kmma {
                        acc += a[mma.mat_a.index(row, k)] * b[mma.mat_b.index(k, col)];
                    }
                    updates.push((mma.mat_c.index(row, col), acc));
                }
            }
        }

        let c = self.pool.get_mut(mma.mat_c.mat)?;
        for (index, value) in updates {
            c[index] = value;
        }
        Ok(())
    }
}

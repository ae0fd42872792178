//! The simulator: job queue, fault state machine, and execution engines.
//!
//! [`SystolicArraySim`] owns one port handle, one netlist fault injector,
//! one job queue, and all matrix storage. It is deliberately not `Clone`
//! (the port handle's lifecycle is tied to the instance); moving it is
//! fine. Hosts wanting parallelism instantiate one simulator per thread.
//!
//! # Usage
//!
//! ```ignore
//! let mut sim = SystolicArraySim::behavioral(SimRng::seeded(1));
//! let a = sim.load_matrix(data_a);
//! // ... load b, c; build an MmaJob; dispatch; exec; read back.
//! sim.dispatch_tile(job)?;
//! sim.exec_rtl(false, false)?;
//! let result = sim.matrix(c)?;
//! ```

use std::collections::VecDeque;

use crate::device::behavioral::BehavioralArray;
use crate::device::config::SaConfig;
use crate::device::port::SystolicPort;
use crate::diag::Diagnostics;
use crate::error::{Result, SimError};
use crate::fault::injector::{NetlistInjector, SyntheticNetlist};
use crate::fault::{CsimPlace, FaultCsim, FaultRtl, FiBits, FiCorruption, FiMode};
use crate::rng::SimRng;

mod csim;
mod io;
pub mod job;
mod rtl;

pub use job::{MatRef, MatrixId, MatrixPool, MmaJob, QueueEntry};

/// Cycle-level simulator of one systolic array.
pub struct SystolicArraySim<P: SystolicPort> {
    pub(crate) config: SaConfig,
    pub(crate) port: P,
    pub(crate) injector: Box<dyn NetlistInjector>,
    pub(crate) pool: MatrixPool,
    pub(crate) queue: VecDeque<QueueEntry>,
    /// Global half-cycle counter, monotonic within one `exec_rtl` call.
    pub(crate) cycle_cnt: usize,
    /// Latched RTL error flag.
    pub(crate) die_error: bool,
    pub(crate) fault_csim: FaultCsim,
    /// Cycle at which a transient C-model fault fires (`usize::MAX` when
    /// unset).
    pub(crate) fault_csim_trans_cycle: usize,
    pub(crate) fault_rtl: FaultRtl,
    /// Cycle at which a transient RTL fault fires (`usize::MAX` when
    /// unset).
    pub(crate) fault_rtl_trans_cycle: usize,
    pub(crate) rng: SimRng,
    /// Counters the host can inspect after a run.
    pub diag: Diagnostics,
}

impl SystolicArraySim<BehavioralArray> {
    /// Build a simulator over the behavioral array with the default
    /// configuration and the synthetic netlist catalog.
    pub fn behavioral(rng: SimRng) -> Self {
        let config = SaConfig::default();
        Self::new(BehavioralArray::new(config), rng)
    }
}

impl<P: SystolicPort> SystolicArraySim<P> {
    /// Build a simulator over an arbitrary port implementation.
    ///
    /// The port must have been built for the default array configuration.
    pub fn new(port: P, rng: SimRng) -> Self {
        let config = SaConfig::default();
        Self::with_injector(port, Box::new(SyntheticNetlist::new(&config)), rng)
    }

    /// Build a simulator with an explicit netlist fault injector.
    pub fn with_injector(port: P, injector: Box<dyn NetlistInjector>, rng: SimRng) -> Self {
        Self {
            config: SaConfig::default(),
            port,
            injector,
            pool: MatrixPool::default(),
            queue: VecDeque::new(),
            cycle_cnt: 0,
            die_error: false,
            fault_csim: FaultCsim::default(),
            fault_csim_trans_cycle: usize::MAX,
            fault_rtl: FaultRtl::default(),
            fault_rtl_trans_cycle: usize::MAX,
            rng,
            diag: Diagnostics::default(),
        }
    }

    /// MMA row count.
    pub fn mmma(&self) -> usize {
        self.config.mmma
    }

    /// MMA depth.
    pub fn kmma(&self) -> usize {
        self.config.kmma
    }

    /// MMA column count.
    pub fn nmma(&self) -> usize {
        self.config.nmma
    }

    /// Tile row count.
    pub fn mtile(&self) -> usize {
        self.config.mtile
    }

    /// Tile depth (equals the MMA depth).
    pub fn ktile(&self) -> usize {
        self.config.ktile()
    }

    /// Tile column count.
    pub fn ntile(&self) -> usize {
        self.config.ntile
    }

    /// Threads running in parallel on one array.
    pub fn threads_per_sa(&self) -> usize {
        self.config.thread_cnt
    }

    /// Arrays working in parallel.
    pub fn sa_cnt(&self) -> usize {
        self.config.systolic_array_cnt
    }

    /// The full array configuration.
    pub fn config(&self) -> &SaConfig {
        &self.config
    }

    /// Global half-cycle counter.
    pub fn cycle_count(&self) -> usize {
        self.cycle_cnt
    }

    /// Jobs currently queued.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Whether the array raised its error flag (parity, residue, or
    /// protocol check) during execution. Latched until the next
    /// simulator instance; a run with this set and no fault injected is a
    /// false positive.
    pub fn error_detected(&self) -> bool {
        self.die_error
    }

    /// Take ownership of a row-major buffer; returns its handle.
    pub fn load_matrix(&mut self, data: Vec<f64>) -> MatrixId {
        self.pool.insert(data)
    }

    /// Borrow a loaded matrix.
    pub fn matrix(&self, id: MatrixId) -> Result<&[f64]> {
        self.pool.get(id)
    }

    /// Borrow a loaded matrix mutably.
    pub fn matrix_mut(&mut self, id: MatrixId) -> Result<&mut [f64]> {
        self.pool.get_mut(id)
    }

    /// Enqueue one MMA job.
    pub fn dispatch_mma(&mut self, mma: MmaJob) -> Result<()> {
        job::check_region(&self.pool, &mma.mat_a, self.config.mmma, self.config.kmma)?;
        job::check_region(&self.pool, &mma.mat_b, self.config.kmma, self.config.nmma)?;
        job::check_region(&self.pool, &mma.mat_c, self.config.mmma, self.config.nmma)?;

        self.queue.push_back(QueueEntry {
            job_cycle: 0,
            job: mma,
        });
        Ok(())
    }

    /// Fan a `(m_cnt*Mmma) x Kmma . Kmma x (n_cnt*Nmma)` MMA out into
    /// `m_cnt * n_cnt` jobs, row-major.
    pub fn dispatch_mma_grid(&mut self, mma: MmaJob, m_cnt: usize, n_cnt: usize) -> Result<()> {
        // Left buffer is larger than the right buffer: walk rows first.
        for row in (0..m_cnt * self.config.mmma).step_by(self.config.mmma) {
            let mat_a = mma.mat_a.with_offset(row * mma.mat_a.stride);
            for col in (0..n_cnt * self.config.nmma).step_by(self.config.nmma) {
                let mat_b = mma.mat_b.with_offset(col);
                let mat_c = mma.mat_c.with_offset(row * mma.mat_c.stride + col);
                self.dispatch_mma(MmaJob {
                    mat_a,
                    mat_b,
                    mat_c,
                })?;
            }
        }
        Ok(())
    }

    /// Fan a full tile out into MMA jobs.
    pub fn dispatch_tile(&mut self, mma: MmaJob) -> Result<()> {
        self.dispatch_mma_grid(
            mma,
            self.config.mtile / self.config.mmma,
            self.config.ntile / self.config.nmma,
        )
    }

    /// Choose a C-model fault. Selectors set to `Everywhere` are resolved
    /// by random draw; the returned record is the concrete fault.
    ///
    /// If a transient fault is chosen, it fires at a random point within
    /// the *currently queued* jobs, so dispatch first.
    pub fn fi_set_csim(
        &mut self,
        place: CsimPlace,
        bits: FiBits,
        corruption: FiCorruption,
        mode: FiMode,
    ) -> Result<FaultCsim> {
        if place == CsimPlace::None
            || bits == FiBits::None
            || corruption == FiCorruption::None
            || mode == FiMode::None
        {
            return Err(SimError::NoneFault);
        }

        self.fault_csim.place = if place == CsimPlace::Everywhere {
            // One multiplier and one adder per k-term plus the final column
            // adder; inputs carry no residual weight after renormalizing.
            let weights = [self.config.kmma, self.config.kmma, 1];
            match self.rng.weighted_pick(&weights) {
                0 => CsimPlace::Multipliers,
                1 => CsimPlace::AccAdders,
                _ => CsimPlace::ColumnAdders,
            }
        } else {
            place
        };

        self.fault_csim.corruption = corruption;

        if mode == FiMode::Transient {
            self.cycle_cnt = 0;
            let total_steps = self.queue.len() * self.config.nmma;
            if total_steps == 0 {
                self.fault_csim = FaultCsim::default();
                return Err(SimError::EmptyQueue);
            }
            self.fault_csim_trans_cycle = self.rng.pick(total_steps);
        }

        self.fault_csim.mode = mode;

        self.fault_csim.bit_pos = match bits {
            FiBits::Everywhere => self.rng.pick(64) as u8,
            FiBits::Mantissa => self.rng.pick(52) as u8,
            FiBits::None => unreachable!("rejected above"),
        };

        self.fault_csim.row = self.rng.pick(self.config.mmma) as u8;

        self.diag
            .fault_event(format!("set C-model fault: {}", self.fault_csim));

        Ok(self.fault_csim)
    }

    /// Clear the C-model fault.
    pub fn fi_reset_csim(&mut self) -> Result<()> {
        if !self.fault_csim.is_set() {
            return Err(SimError::NoFaultSet);
        }
        self.fault_csim = FaultCsim::default();
        self.fault_csim_trans_cycle = usize::MAX;
        Ok(())
    }

    /// Choose an RTL fault from the netlist injector. The returned record
    /// is the concrete fault.
    ///
    /// If a transient fault is chosen, it fires at a random cycle within
    /// the *currently queued* jobs, so dispatch first.
    pub fn fi_set_rtl(&mut self, mode: FiMode) -> Result<FaultRtl> {
        if mode == FiMode::None {
            return Err(SimError::NoneFault);
        }

        let site = self.injector.random_fault(&mut self.rng)?;
        self.fault_rtl.module_instance_chain = site.module_instance_chain;
        self.fault_rtl.assign_uuid = site.assign_uuid;
        self.fault_rtl.bit_pos = (self.rng.random_bits() % site.signal_width as u64) as u16;

        if mode == FiMode::Transient {
            self.cycle_cnt = 0;
            let cycles_required = self.config.cycles_required(self.queue.len());
            if cycles_required == 0 {
                self.fault_rtl = FaultRtl::default();
                return Err(SimError::EmptyQueue);
            }
            self.fault_rtl_trans_cycle = (self.rng.random_bits() % cycles_required as u64) as usize;
        }

        self.fault_rtl.mode = mode;

        self.diag.fault_event(format!(
            "set RTL fault: chain {:?}, assign {}, bit {}, {:?}",
            self.fault_rtl.module_instance_chain,
            self.fault_rtl.assign_uuid,
            self.fault_rtl.bit_pos,
            self.fault_rtl.mode
        ));

        Ok(self.fault_rtl.clone())
    }

    /// Clear the RTL fault.
    pub fn fi_reset_rtl(&mut self) -> Result<()> {
        if !self.fault_rtl.is_set() {
            return Err(SimError::NoFaultSet);
        }
        self.fault_rtl = FaultRtl::default();
        self.fault_rtl_trans_cycle = usize::MAX;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::injector::FaultSite;
    use crate::testing::{
        accumulate_reference, gemm_reference, max_rel_error, random_matrix, random_sign_matrix,
        run_gemm, Engine, REL_TOLERANCE,
    };
    use smallvec::SmallVec;

    fn behavioral_sim(seed: u64) -> SystolicArraySim<BehavioralArray> {
        SystolicArraySim::behavioral(SimRng::seeded(seed))
    }

    fn load_single_job(
        sim: &mut SystolicArraySim<BehavioralArray>,
        a: &[f64],
        b: &[f64],
        c: &[f64],
    ) -> (MmaJob, MatrixId) {
        let (k, n) = (sim.kmma(), sim.nmma());
        let a_id = sim.load_matrix(a.to_vec());
        let b_id = sim.load_matrix(b.to_vec());
        let c_id = sim.load_matrix(c.to_vec());
        let mma = MmaJob {
            mat_a: MatRef::new(a_id, k),
            mat_b: MatRef::new(b_id, n),
            mat_c: MatRef::new(c_id, n),
        };
        (mma, c_id)
    }

    fn exec(sim: &mut SystolicArraySim<BehavioralArray>, engine: Engine) {
        match engine {
            Engine::Csim => sim.exec_csim(usize::MAX).unwrap(),
            Engine::Rtl => sim.exec_rtl(false, false).unwrap(),
        }
    }

    #[test]
    fn test_identity_fma_all_sign_variations() {
        for engine in [Engine::Csim, Engine::Rtl] {
            for sa in [1.0, -1.0] {
                for sb in [1.0, -1.0] {
                    for sc in [1.0, -1.0] {
                        let mut sim = behavioral_sim(42);
                        let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
                        let mut a = vec![0.0; m * k];
                        let mut b = vec![0.0; k * n];
                        let mut c = vec![0.0; m * n];
                        a[0] = sa;
                        b[0] = sb;
                        c[0] = sc;

                        let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
                        sim.dispatch_mma(mma).unwrap();
                        exec(&mut sim, engine);

                        let out = sim.matrix(c_id).unwrap();
                        assert_eq!(out[0], sa * sb + sc, "{sa} * {sb} + {sc}");
                        assert!(out[1..].iter().all(|v| *v == 0.0));
                        assert!(!sim.error_detected());
                    }
                }
            }
        }
    }

    #[test]
    fn test_mma_sign_matrices_bit_exact() {
        let mut rng = SimRng::seeded(7);
        let (m, k, n) = (8, 8, 8);
        let a = random_sign_matrix(&mut rng, m, k, k);
        let b = random_sign_matrix(&mut rng, k, n, n);
        let c = random_sign_matrix(&mut rng, m, n, n);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, n, &a, k, &b, n, m, k, n);

        for engine in [Engine::Csim, Engine::Rtl] {
            let mut sim = behavioral_sim(3);
            let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
            sim.dispatch_mma(mma).unwrap();
            exec(&mut sim, engine);
            assert_eq!(sim.matrix(c_id).unwrap(), expected.as_slice());
        }
    }

    #[test]
    fn test_mma_grid_fanout() {
        let mut rng = SimRng::seeded(11);
        let a = random_matrix(&mut rng, 16, 8, 8, 5);
        let b = random_matrix(&mut rng, 8, 16, 16, 5);
        let c = random_matrix(&mut rng, 16, 16, 32, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, 32, &a, 8, &b, 16, 16, 8, 16);

        for engine in [Engine::Csim, Engine::Rtl] {
            let mut sim = behavioral_sim(5);
            let a_id = sim.load_matrix(a.clone());
            let b_id = sim.load_matrix(b.clone());
            let c_id = sim.load_matrix(c.clone());
            sim.dispatch_mma_grid(
                MmaJob {
                    mat_a: MatRef::new(a_id, 8),
                    mat_b: MatRef::new(b_id, 16),
                    mat_c: MatRef::new(c_id, 32),
                },
                2,
                2,
            )
            .unwrap();
            assert_eq!(sim.queued_jobs(), 4);
            exec(&mut sim, engine);
            let worst = max_rel_error(&expected, sim.matrix(c_id).unwrap());
            assert!(worst <= REL_TOLERANCE, "max rel error {worst:e}");
        }
    }

    #[test]
    fn test_tile_drains_in_exact_cycle_budget() {
        let mut rng = SimRng::seeded(13);
        let mut sim = behavioral_sim(17);
        let (mt, kt, nt) = (sim.mtile(), sim.ktile(), sim.ntile());
        let a = random_matrix(&mut rng, mt, kt, kt, 5);
        let b = random_matrix(&mut rng, kt, nt, nt, 5);
        let c = random_matrix(&mut rng, mt, nt, nt, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, nt, &a, kt, &b, nt, mt, kt, nt);

        let a_id = sim.load_matrix(a);
        let b_id = sim.load_matrix(b);
        let c_id = sim.load_matrix(c);
        sim.dispatch_tile(MmaJob {
            mat_a: MatRef::new(a_id, kt),
            mat_b: MatRef::new(b_id, nt),
            mat_c: MatRef::new(c_id, nt),
        })
        .unwrap();
        assert_eq!(sim.queued_jobs(), 16);

        sim.exec_rtl(false, false).unwrap();

        assert_eq!(sim.config().cycles_required(16), 337);
        assert_eq!(sim.cycle_count(), 337);
        assert!(max_rel_error(&expected, sim.matrix(c_id).unwrap()) <= REL_TOLERANCE);
        assert!(!sim.error_detected());
    }

    #[test]
    fn test_tile_csim_matches_reference() {
        let mut rng = SimRng::seeded(13);
        let mut sim = behavioral_sim(19);
        let (mt, kt, nt) = (sim.mtile(), sim.ktile(), sim.ntile());
        let a = random_matrix(&mut rng, mt, kt, kt, 5);
        let b = random_matrix(&mut rng, kt, nt, nt, 5);
        let c = random_matrix(&mut rng, mt, nt, nt, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, nt, &a, kt, &b, nt, mt, kt, nt);

        let a_id = sim.load_matrix(a);
        let b_id = sim.load_matrix(b);
        let c_id = sim.load_matrix(c);
        sim.dispatch_tile(MmaJob {
            mat_a: MatRef::new(a_id, kt),
            mat_b: MatRef::new(b_id, nt),
            mat_c: MatRef::new(c_id, nt),
        })
        .unwrap();
        sim.exec_csim(usize::MAX).unwrap();

        assert!(max_rel_error(&expected, sim.matrix(c_id).unwrap()) <= REL_TOLERANCE);
    }

    #[test]
    fn test_chained_depth_accumulation() {
        let mut rng = SimRng::seeded(19);
        let (m, depth, n) = (16, 16, 16);
        let a = random_matrix(&mut rng, m, depth, depth, 5);
        let b = random_matrix(&mut rng, depth, n, n, 5);
        let c = random_matrix(&mut rng, m, n, n, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, n, &a, depth, &b, n, m, depth, n);

        for engine in [Engine::Csim, Engine::Rtl] {
            let mut sim = behavioral_sim(23);
            let a_id = sim.load_matrix(a.clone());
            let b_id = sim.load_matrix(b.clone());
            let c_id = sim.load_matrix(c.clone());
            for chunk in 0..2 {
                sim.dispatch_mma_grid(
                    MmaJob {
                        mat_a: MatRef::new(a_id, depth).with_offset(chunk * 8),
                        mat_b: MatRef::new(b_id, n).with_offset(chunk * 8 * n),
                        mat_c: MatRef::new(c_id, n),
                    },
                    2,
                    2,
                )
                .unwrap();
            }
            exec(&mut sim, engine);
            let worst = max_rel_error(&expected, sim.matrix(c_id).unwrap());
            assert!(worst <= REL_TOLERANCE, "max rel error {worst:e}");
        }
    }

    #[test]
    fn test_irregular_gemm() {
        let mut rng = SimRng::seeded(29);
        let (m, depth, n) = (14, 27, 27);
        let a = random_matrix(&mut rng, m, depth, depth, 5);
        let b = random_matrix(&mut rng, depth, n, n, 5);
        let c = random_matrix(&mut rng, m, n, n, 5);

        for engine in [Engine::Csim, Engine::Rtl] {
            let mut sim = behavioral_sim(31);
            let out = run_gemm(&mut sim, engine, &a, &b, &c, m, depth, n).unwrap();
            let expected = gemm_reference(&a, &b, &c, m, depth, n, sim.mmma(), sim.nmma());
            let worst = max_rel_error(&expected, &out);
            assert!(worst <= REL_TOLERANCE, "max rel error {worst:e}");
        }
    }

    #[test]
    fn test_transient_multiplier_fault_corrupts_at_most_one_element() {
        let mut visible = 0;
        for seed in 0..16 {
            let mut sim = behavioral_sim(seed);
            let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
            let mut rng = SimRng::seeded(seed + 100);
            let a = random_sign_matrix(&mut rng, m, k, k);
            let b = random_sign_matrix(&mut rng, k, n, n);
            let c = random_sign_matrix(&mut rng, m, n, n);

            let mut expected = c.clone();
            accumulate_reference(&mut expected, n, &a, k, &b, n, m, k, n);

            let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
            sim.dispatch_mma(mma).unwrap();

            let fault = sim
                .fi_set_csim(
                    CsimPlace::Multipliers,
                    FiBits::Everywhere,
                    FiCorruption::Flip,
                    FiMode::Transient,
                )
                .unwrap();
            assert_eq!(fault.place, CsimPlace::Multipliers);
            sim.exec_csim(usize::MAX).unwrap();

            let out = sim.matrix(c_id).unwrap();
            let target = fault.row as usize;
            let mut diffs = 0;
            for row in 0..m {
                for col in 0..n {
                    let e = expected[row * n + col];
                    let g = out[row * n + col];
                    let same = e == g;
                    if row != target {
                        assert!(same, "seed {seed}: off-target row {row} col {col} corrupted");
                    } else if !same {
                        diffs += 1;
                    }
                }
            }
            assert!(diffs <= 1, "seed {seed}: transient fault hit {diffs} elements");
            visible += usize::from(diffs == 1);
        }
        // Low-order mantissa flips can round away; most must be visible.
        assert!(visible >= 8, "only {visible} of 16 transient faults visible");
    }

    #[test]
    fn test_transient_fault_localized_for_all_places() {
        for place in [
            CsimPlace::Inputs,
            CsimPlace::AccAdders,
            CsimPlace::ColumnAdders,
        ] {
            for seed in 0..4 {
                let mut sim = behavioral_sim(seed + 200);
                let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
                let mut rng = SimRng::seeded(seed + 300);
                let a = random_sign_matrix(&mut rng, m, k, k);
                let b = random_sign_matrix(&mut rng, k, n, n);
                let c = random_sign_matrix(&mut rng, m, n, n);

                let mut expected = c.clone();
                accumulate_reference(&mut expected, n, &a, k, &b, n, m, k, n);

                let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
                sim.dispatch_mma(mma).unwrap();
                let fault = sim
                    .fi_set_csim(place, FiBits::Everywhere, FiCorruption::Flip, FiMode::Transient)
                    .unwrap();
                assert_eq!(fault.place, place);
                sim.exec_csim(usize::MAX).unwrap();

                let out = sim.matrix(c_id).unwrap();
                let target = fault.row as usize;
                let mut diffs = 0;
                for row in 0..m {
                    for col in 0..n {
                        let same = expected[row * n + col] == out[row * n + col];
                        if row != target {
                            assert!(same, "{place:?} seed {seed}: off-target corruption");
                        } else if !same {
                            diffs += 1;
                        }
                    }
                }
                assert!(diffs <= 1, "{place:?} seed {seed}: {diffs} elements hit");
                if place == CsimPlace::ColumnAdders {
                    // A flip of the stored column result is always visible.
                    assert_eq!(diffs, 1, "{place:?} seed {seed}");
                }
            }
        }
    }

    #[test]
    fn test_permanent_column_adder_flip_corrupts_whole_row() {
        let mut sim = behavioral_sim(37);
        let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
        let mut rng = SimRng::seeded(400);
        let a = random_sign_matrix(&mut rng, m, k, k);
        let b = random_sign_matrix(&mut rng, k, n, n);
        let c = random_sign_matrix(&mut rng, m, n, n);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, n, &a, k, &b, n, m, k, n);

        let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
        sim.dispatch_mma(mma).unwrap();
        let fault = sim
            .fi_set_csim(
                CsimPlace::ColumnAdders,
                FiBits::Everywhere,
                FiCorruption::Flip,
                FiMode::Permanent,
            )
            .unwrap();
        sim.exec_csim(usize::MAX).unwrap();

        let out = sim.matrix(c_id).unwrap();
        let target = fault.row as usize;
        for row in 0..m {
            for col in 0..n {
                let e = expected[row * n + col];
                let g = out[row * n + col];
                if row == target {
                    assert_ne!(e.to_bits(), g.to_bits(), "row {row} col {col}");
                } else {
                    assert_eq!(e.to_bits(), g.to_bits(), "row {row} col {col}");
                }
            }
        }
    }

    #[test]
    fn test_read_before_write_rejected() {
        let mut sim = behavioral_sim(41);
        let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
        let buf_a = sim.load_matrix(vec![1.0; m * k]);
        let buf_b = sim.load_matrix(vec![1.0; k * n]);
        let buf_c = sim.load_matrix(vec![0.0; m * n]);
        let buf_d = sim.load_matrix(vec![0.0; m * n]);

        sim.dispatch_mma(MmaJob {
            mat_a: MatRef::new(buf_a, k),
            mat_b: MatRef::new(buf_b, n),
            mat_c: MatRef::new(buf_c, n),
        })
        .unwrap();
        // The second job reads the first job's output region.
        sim.dispatch_mma(MmaJob {
            mat_a: MatRef::new(buf_c, k),
            mat_b: MatRef::new(buf_b, n),
            mat_c: MatRef::new(buf_d, n),
        })
        .unwrap();

        let err = sim.exec_rtl(false, false).unwrap_err();
        assert_eq!(
            err,
            SimError::ReadBeforeWrite {
                earlier: 0,
                later: 1
            }
        );
        // Refused before any cycle ran.
        assert_eq!(sim.cycle_count(), 0);
        assert!(sim.matrix(buf_d).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fast_transient_test_mode_results_exact() {
        for seed in 0..8 {
            let mut rng = SimRng::seeded(500 + seed);
            let mut sim = behavioral_sim(seed);
            let (mt, kt, nt) = (sim.mtile(), sim.ktile(), sim.ntile());
            let a = random_matrix(&mut rng, mt, kt, kt, 5);
            let b = random_matrix(&mut rng, kt, nt, nt, 5);
            let c = random_matrix(&mut rng, mt, nt, nt, 5);

            let mut expected = c.clone();
            accumulate_reference(&mut expected, nt, &a, kt, &b, nt, mt, kt, nt);

            let a_id = sim.load_matrix(a);
            let b_id = sim.load_matrix(b);
            let c_id = sim.load_matrix(c);
            sim.dispatch_tile(MmaJob {
                mat_a: MatRef::new(a_id, kt),
                mat_b: MatRef::new(b_id, nt),
                mat_c: MatRef::new(c_id, nt),
            })
            .unwrap();

            let fault = sim.fi_set_rtl(FiMode::Transient).unwrap();
            assert_eq!(fault.mode, FiMode::Transient);

            // Pretend mode: all the fast-transient plumbing, no fault.
            sim.exec_rtl(true, true).unwrap();

            let worst = max_rel_error(&expected, sim.matrix(c_id).unwrap());
            assert!(worst <= REL_TOLERANCE, "seed {seed}: max rel error {worst:e}");
            assert!(!sim.error_detected(), "seed {seed}");
        }
    }

    #[test]
    fn test_fast_transient_drains_queue() {
        for seed in 0..8u64 {
            let mut rng = SimRng::seeded(600 + seed);
            let mut sim = behavioral_sim(seed);
            let (mt, kt, nt) = (sim.mtile(), sim.ktile(), sim.ntile());
            let a = random_matrix(&mut rng, mt, kt, kt, 5);
            let b = random_matrix(&mut rng, kt, nt, nt, 5);
            let c = random_matrix(&mut rng, mt, nt, nt, 5);

            let a_id = sim.load_matrix(a);
            let b_id = sim.load_matrix(b);
            let c_id = sim.load_matrix(c);
            sim.dispatch_tile(MmaJob {
                mat_a: MatRef::new(a_id, kt),
                mat_b: MatRef::new(b_id, nt),
                mat_c: MatRef::new(c_id, nt),
            })
            .unwrap();

            sim.fi_set_rtl(FiMode::Transient).unwrap();
            sim.exec_rtl(true, false).unwrap();
            assert_eq!(sim.queued_jobs(), 0, "seed {seed}");
        }
    }

    /// Injector that always returns the row-2 column-adder site with a
    /// 1-bit signal, so the drawn bit position is always 0.
    struct FixedSite;

    impl NetlistInjector for FixedSite {
        fn random_fault(&mut self, _rng: &mut SimRng) -> crate::error::Result<FaultSite> {
            Ok(FaultSite {
                module_instance_chain: SmallVec::from_slice(&[2, 2]),
                assign_uuid: (2 << 8) | 8,
                signal_width: 1,
            })
        }
    }

    #[test]
    fn test_permanent_rtl_fault_detected_and_localized() {
        let port = BehavioralArray::new(SaConfig::default());
        let mut sim = SystolicArraySim::with_injector(port, Box::new(FixedSite), SimRng::seeded(43));
        let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
        let a = vec![1.0; m * k];
        let b = vec![1.0; k * n];
        let c = vec![1.0; m * n];

        let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
        sim.dispatch_mma(mma).unwrap();
        let fault = sim.fi_set_rtl(FiMode::Permanent).unwrap();
        assert_eq!(fault.bit_pos, 0);

        sim.exec_rtl(false, false).unwrap();
        assert!(sim.error_detected());
        assert!(sim.diag.soft_errors > 0);

        let forced = f64::from_bits(9.0f64.to_bits() | 1);
        let out = sim.matrix(c_id).unwrap();
        for row in 0..m {
            for col in 0..n {
                let expected = if row == 2 { forced } else { 9.0 };
                assert_eq!(out[row * n + col], expected, "row {row} col {col}");
            }
        }
    }

    #[test]
    fn test_partial_row_build_completed_by_cmodel() {
        let mut rng = SimRng::seeded(47);
        let port = BehavioralArray::with_rows(SaConfig::default(), 4);
        let mut sim = SystolicArraySim::new(port, SimRng::seeded(48));
        let (m, k, n) = (sim.mmma(), sim.kmma(), sim.nmma());
        let a = random_matrix(&mut rng, m, k, k, 5);
        let b = random_matrix(&mut rng, k, n, n, 5);
        let c = random_matrix(&mut rng, m, n, n, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, n, &a, k, &b, n, m, k, n);

        let (mma, c_id) = load_single_job(&mut sim, &a, &b, &c);
        sim.dispatch_mma(mma).unwrap();
        sim.exec_rtl(false, false).unwrap();

        assert!(max_rel_error(&expected, sim.matrix(c_id).unwrap()) <= REL_TOLERANCE);
        assert!(!sim.error_detected());
    }

    #[test]
    fn test_fault_state_machine() {
        let mut sim = behavioral_sim(53);

        assert_eq!(
            sim.fi_set_csim(
                CsimPlace::None,
                FiBits::Everywhere,
                FiCorruption::Flip,
                FiMode::Permanent
            ),
            Err(SimError::NoneFault)
        );
        assert_eq!(sim.fi_set_rtl(FiMode::None), Err(SimError::NoneFault));

        // Transient faults need queued work to draw a firing point from.
        assert_eq!(
            sim.fi_set_csim(
                CsimPlace::Everywhere,
                FiBits::Everywhere,
                FiCorruption::Flip,
                FiMode::Transient
            ),
            Err(SimError::EmptyQueue)
        );
        assert_eq!(sim.fi_set_rtl(FiMode::Transient), Err(SimError::EmptyQueue));

        assert_eq!(sim.fi_reset_csim(), Err(SimError::NoFaultSet));
        assert_eq!(sim.fi_reset_rtl(), Err(SimError::NoFaultSet));

        sim.fi_set_csim(
            CsimPlace::Everywhere,
            FiBits::Mantissa,
            FiCorruption::StuckLow,
            FiMode::Permanent,
        )
        .unwrap();
        sim.fi_reset_csim().unwrap();
        assert_eq!(sim.fi_reset_csim(), Err(SimError::NoFaultSet));

        sim.fi_set_rtl(FiMode::Permanent).unwrap();
        sim.fi_reset_rtl().unwrap();
        assert_eq!(sim.fi_reset_rtl(), Err(SimError::NoFaultSet));
    }

    #[test]
    fn test_exec_csim_job_budget() {
        let mut rng = SimRng::seeded(59);
        let mut sim = behavioral_sim(60);
        let a = random_matrix(&mut rng, 16, 8, 8, 5);
        let b = random_matrix(&mut rng, 8, 16, 16, 5);
        let c = random_matrix(&mut rng, 16, 16, 16, 5);

        let mut expected = c.clone();
        accumulate_reference(&mut expected, 16, &a, 8, &b, 16, 16, 8, 16);

        let a_id = sim.load_matrix(a);
        let b_id = sim.load_matrix(b);
        let c_id = sim.load_matrix(c);
        sim.dispatch_mma_grid(
            MmaJob {
                mat_a: MatRef::new(a_id, 8),
                mat_b: MatRef::new(b_id, 16),
                mat_c: MatRef::new(c_id, 16),
            },
            2,
            2,
        )
        .unwrap();
        assert_eq!(sim.queued_jobs(), 4);

        sim.exec_csim(2).unwrap();
        assert_eq!(sim.queued_jobs(), 2);

        sim.exec_csim(usize::MAX).unwrap();
        assert_eq!(sim.queued_jobs(), 0);
        assert!(max_rel_error(&expected, sim.matrix(c_id).unwrap()) <= REL_TOLERANCE);
    }

    #[test]
    fn test_dispatch_validation() {
        let mut sim = behavioral_sim(61);
        let a = sim.load_matrix(vec![0.0; 64]);
        let b = sim.load_matrix(vec![0.0; 64]);
        let small = sim.load_matrix(vec![0.0; 63]);

        assert!(matches!(
            sim.dispatch_mma(MmaJob {
                mat_a: MatRef::new(a, 4),
                mat_b: MatRef::new(b, 8),
                mat_c: MatRef::new(b, 8),
            }),
            Err(SimError::StrideTooSmall { stride: 4, min: 8 })
        ));
        assert!(matches!(
            sim.dispatch_mma(MmaJob {
                mat_a: MatRef::new(a, 8),
                mat_b: MatRef::new(b, 8),
                mat_c: MatRef::new(small, 8),
            }),
            Err(SimError::RegionOutOfBounds { .. })
        ));
        assert_eq!(sim.queued_jobs(), 0);
    }

    #[test]
    fn test_everywhere_place_draw() {
        let mut sim = behavioral_sim(67);
        let mut seen_mult = false;
        let mut seen_acc = false;

        for _ in 0..64 {
            let fault = sim
                .fi_set_csim(
                    CsimPlace::Everywhere,
                    FiBits::Everywhere,
                    FiCorruption::Flip,
                    FiMode::Permanent,
                )
                .unwrap();
            match fault.place {
                CsimPlace::Multipliers => seen_mult = true,
                CsimPlace::AccAdders => seen_acc = true,
                CsimPlace::ColumnAdders => {}
                other => panic!("unexpected place {other:?}"),
            }
            assert!(fault.bit_pos < 64);
            assert!((fault.row as usize) < sim.mmma());
        }
        assert!(seen_mult && seen_acc);

        let fault = sim
            .fi_set_csim(
                CsimPlace::Inputs,
                FiBits::Mantissa,
                FiCorruption::Flip,
                FiMode::Permanent,
            )
            .unwrap();
        assert_eq!(fault.place, CsimPlace::Inputs);
        assert!(fault.bit_pos < 52);
    }

    #[test]
    fn test_exec_with_empty_queue_is_noop() {
        let mut sim = behavioral_sim(71);
        sim.exec_csim(usize::MAX).unwrap();
        sim.exec_rtl(false, false).unwrap();
        assert_eq!(sim.cycle_count(), 0);
        assert!(!sim.error_detected());
    }
}

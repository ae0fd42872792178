//! Scenario support: random matrices, reference results, GEMM driving.
//!
//! Shared between the unit tests and the CLI driver so both exercise the
//! simulator the same way a host framework would: load buffers, dispatch
//! tile- or MMA-sized jobs, drain an engine, read back, compare against a
//! plain reference loop. Dispatch and collection are separate steps so a
//! transient fault can be armed against the queued work.

use crate::device::port::SystolicPort;
use crate::error::Result;
use crate::rng::SimRng;
use crate::sim::{MatRef, MatrixId, MmaJob, SystolicArraySim};

/// Relative tolerance for result checks.
pub const REL_TOLERANCE: f64 = 3.0e-10;

/// Which execution engine to drain the queue with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Behavioral C-model.
    Csim,
    /// Cycle-driven execution through the port interface.
    Rtl,
}

/// Row-major `rows x cols` matrix with the given stride, filled with
/// random doubles of bounded exponent (about one in ten entries is zero).
pub fn random_matrix(
    rng: &mut SimRng,
    rows: usize,
    cols: usize,
    stride: usize,
    exp_range: i32,
) -> Vec<f64> {
    debug_assert!(stride >= cols);
    (0..rows * stride)
        .map(|_| rng.random_double(-exp_range, exp_range, 0.1))
        .collect()
}

/// Row-major matrix of random `+1.0` / `-1.0` entries.
pub fn random_sign_matrix(rng: &mut SimRng, rows: usize, cols: usize, stride: usize) -> Vec<f64> {
    debug_assert!(stride >= cols);
    (0..rows * stride)
        .map(|_| if rng.pick(2) == 0 { 1.0 } else { -1.0 })
        .collect()
}

/// Accumulate `C += A * B` over an `m x depth . depth x n` product, with
/// the same k-major summation order the array uses, so exact comparisons
/// are meaningful.
pub fn accumulate_reference(
    c: &mut [f64],
    sc: usize,
    a: &[f64],
    sa: usize,
    b: &[f64],
    sb: usize,
    m: usize,
    depth: usize,
    n: usize,
) {
    for row in 0..m {
        for col in 0..n {
            let mut acc = c[row * sc + col];
            for k in 0..depth {
                acc += a[row * sa + k] * b[k * sb + col];
            }
            c[row * sc + col] = acc;
        }
    }
}

/// Largest relative difference between two equally laid out buffers.
/// Exactly equal elements (including two zeros) contribute nothing.
pub fn max_rel_error(expected: &[f64], got: &[f64]) -> f64 {
    debug_assert_eq!(expected.len(), got.len());
    let mut worst: f64 = 0.0;
    for (e, g) in expected.iter().zip(got) {
        if e == g {
            continue;
        }
        let rel = (e - g).abs() / e.abs();
        if rel > worst {
            worst = rel;
        }
    }
    worst
}

/// A dispatched-but-not-yet-executed GEMM.
#[derive(Debug, Clone, Copy)]
pub struct GemmPlan {
    /// Handle to the output buffer inside the simulator.
    pub out_id: MatrixId,
    /// Dispatch block height (tile or MMA rows).
    pub out_m: usize,
    /// Dispatch block width.
    pub out_n: usize,
    /// Dispatch block depth.
    pub out_k: usize,
}

/// Queue a full `m x depth . depth x n` GEMM the way the original host
/// does: tile-sized dispatches when the output is large enough, MMA-sized
/// otherwise, the depth walked in chunks.
pub fn dispatch_gemm<P: SystolicPort>(
    sim: &mut SystolicArraySim<P>,
    a: &[f64],
    b: &[f64],
    c: &[f64],
    m: usize,
    depth: usize,
    n: usize,
) -> Result<GemmPlan> {
    let tile_en = m > sim.mtile() && n > sim.ntile();
    let out_m = if tile_en { sim.mtile() } else { sim.mmma() };
    let out_n = if tile_en { sim.ntile() } else { sim.nmma() };
    let out_k = if tile_en { sim.ktile() } else { sim.kmma() };

    let a_id = sim.load_matrix(a.to_vec());
    let b_id = sim.load_matrix(b.to_vec());
    let out_id = sim.load_matrix(c.to_vec());

    let mut k_pos = 0;
    while k_pos + out_k <= depth {
        let mut m_pos = 0;
        while m_pos + out_m <= m {
            let mut n_pos = 0;
            while n_pos + out_n <= n {
                let mma = MmaJob {
                    mat_a: MatRef::new(a_id, depth).with_offset(m_pos * depth + k_pos),
                    mat_b: MatRef::new(b_id, n).with_offset(k_pos * n + n_pos),
                    mat_c: MatRef::new(out_id, n).with_offset(m_pos * n + n_pos),
                };
                if tile_en {
                    sim.dispatch_tile(mma)?;
                } else {
                    sim.dispatch_mma(mma)?;
                }
                n_pos += out_n;
            }
            m_pos += out_m;
        }
        k_pos += out_k;
    }

    Ok(GemmPlan {
        out_id,
        out_m,
        out_n,
        out_k,
    })
}

/// Read a finished GEMM back, folding the depth remainder in on the host.
pub fn collect_gemm<P: SystolicPort>(
    sim: &SystolicArraySim<P>,
    plan: &GemmPlan,
    a: &[f64],
    b: &[f64],
    m: usize,
    depth: usize,
    n: usize,
) -> Result<Vec<f64>> {
    let mut out = sim.matrix(plan.out_id)?.to_vec();

    if depth % plan.out_k != 0 {
        for row in 0..(m / plan.out_m) * plan.out_m {
            for col in 0..(n / plan.out_n) * plan.out_n {
                for k in (depth / plan.out_k) * plan.out_k..depth {
                    out[row * n + col] += a[row * depth + k] * b[k * n + col];
                }
            }
        }
    }

    Ok(out)
}

/// Dispatch, drain, and collect a GEMM in one call (no fault).
pub fn run_gemm<P: SystolicPort>(
    sim: &mut SystolicArraySim<P>,
    engine: Engine,
    a: &[f64],
    b: &[f64],
    c: &[f64],
    m: usize,
    depth: usize,
    n: usize,
) -> Result<Vec<f64>> {
    let plan = dispatch_gemm(sim, a, b, c, m, depth, n)?;
    match engine {
        Engine::Csim => sim.exec_csim(usize::MAX)?,
        Engine::Rtl => sim.exec_rtl(false, false)?,
    }
    collect_gemm(sim, &plan, a, b, m, depth, n)
}

/// Reference result for [`run_gemm`]: the covered `out_m`/`out_n`-aligned
/// output region gets the full-depth product accumulated on top of `c`;
/// the rest stays as `c`.
pub fn gemm_reference(
    a: &[f64],
    b: &[f64],
    c: &[f64],
    m: usize,
    depth: usize,
    n: usize,
    out_m: usize,
    out_n: usize,
) -> Vec<f64> {
    let mut expected = c.to_vec();
    accumulate_reference(
        &mut expected,
        n,
        a,
        depth,
        b,
        n,
        (m / out_m) * out_m,
        depth,
        (n / out_n) * out_n,
    );
    expected
}

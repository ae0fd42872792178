//! sasim library
//!
//! Cycle-level behavioral simulation of a systolic-array matrix-multiply-
//! accumulate (MMA) accelerator, plus a fault-injection harness for
//! resilience studies.
//!
//! # Module Organization
//!
//! - [`numeric`]: Fixed-width floating-point codecs and bit-packed buffer ops
//! - [`fault`]: Fault records, the corruption primitive, netlist injector seam
//! - [`device`]: Array configuration, the opaque port trait, behavioral array
//! - [`sim`]: Job queue, per-cycle I/O driver, C-model, execution orchestrators
//! - [`config`]: Host-facing fault-campaign configuration (env + TOML)
//! - [`testing`]: Scenario helpers (random matrices, reference GEMM)
//!
//! # Example
//!
//! ```
//! use sasim::rng::SimRng;
//! use sasim::sim::{MatRef, MmaJob, SystolicArraySim};
//!
//! let mut sim = SystolicArraySim::behavioral(SimRng::seeded(7));
//! let k = sim.kmma();
//! let n = sim.nmma();
//!
//! let a = sim.load_matrix(vec![1.0; sim.mmma() * k]);
//! let b = sim.load_matrix(vec![1.0; k * n]);
//! let c = sim.load_matrix(vec![0.0; sim.mmma() * n]);
//!
//! let job = MmaJob {
//!     mat_a: MatRef::new(a, k),
//!     mat_b: MatRef::new(b, n),
//!     mat_c: MatRef::new(c, n),
//! };
//! sim.dispatch_mma(job)?;
//! sim.exec_csim(usize::MAX)?;
//! assert_eq!(sim.matrix(c)?[0], 8.0);
//! # Ok::<(), sasim::SimError>(())
//! ```

pub mod config;
pub mod device;
pub mod diag;
pub mod error;
pub mod fault;
pub mod numeric;
pub mod rng;
pub mod sim;
pub mod testing;

pub use error::{Result, SimError};

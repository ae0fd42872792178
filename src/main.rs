//! sasim: drive random GEMMs through the systolic-array simulator.
//!
//! ```text
//! sasim [--csim|--rtl] [--exp-range=N] [MxKxN]
//! ```
//!
//! Fault campaigns are configured through the environment or `sasim.toml`
//! (see `sasim::config`); with no fault armed the run is checked against a
//! reference GEMM and fails on mismatch.

use std::env;

use anyhow::{bail, Context, Result};

use sasim::config::CampaignConfig;
use sasim::fault::FiMode;
use sasim::rng::SimRng;
use sasim::sim::SystolicArraySim;
use sasim::testing::{
    collect_gemm, dispatch_gemm, gemm_reference, max_rel_error, random_matrix, Engine,
    REL_TOLERANCE,
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut engine = Engine::Rtl;
    let mut dims = (32usize, 16usize, 32usize);
    let mut exp_range = 5i32;

    for arg in &args[1..] {
        if arg == "--csim" {
            engine = Engine::Csim;
        } else if arg == "--rtl" {
            engine = Engine::Rtl;
        } else if arg == "--help" || arg == "-h" {
            println!("usage: sasim [--csim|--rtl] [--exp-range=N] [MxKxN]");
            println!();
            println!("sample fault-campaign config:");
            println!("{}", CampaignConfig::sample_config());
            return Ok(());
        } else if let Some(value) = arg.strip_prefix("--exp-range=") {
            exp_range = value
                .parse()
                .with_context(|| format!("bad exponent range `{value}`"))?;
        } else if arg.contains('x') {
            let parts: Vec<usize> = arg
                .split('x')
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("bad dimensions `{arg}` (expected MxKxN)"))?;
            if parts.len() != 3 {
                bail!("bad dimensions `{arg}` (expected MxKxN)");
            }
            dims = (parts[0], parts[1], parts[2]);
        } else {
            bail!("unknown argument `{arg}`");
        }
    }

    let (m, depth, n) = dims;
    let config = CampaignConfig::get();

    let mut rng = match config.seed {
        Some(seed) => SimRng::seeded(seed),
        None => SimRng::from_entropy(),
    };

    let a = random_matrix(&mut rng, m, depth, depth, exp_range);
    let b = random_matrix(&mut rng, depth, n, n, exp_range);
    let c = random_matrix(&mut rng, m, n, n, exp_range);

    let mut sim = SystolicArraySim::behavioral(rng);
    println!(
        "running {m}x{depth}x{n} GEMM on the {} engine",
        if engine == Engine::Csim { "C-model" } else { "cycle" }
    );

    let plan = dispatch_gemm(&mut sim, &a, &b, &c, m, depth, n)?;

    // A transient fault draws its firing point from the queued work, so
    // arm only after dispatch.
    let mut fault_armed = false;
    match engine {
        Engine::Csim => {
            if let Some(fault) = config.arm_csim(&mut sim)? {
                println!("armed C-model fault: {fault}");
                fault_armed = true;
            }
        }
        Engine::Rtl => {
            if config.fault_armed() {
                let mode = config.fi_mode.unwrap_or(FiMode::None);
                let fault = sim.fi_set_rtl(mode)?;
                println!(
                    "armed RTL fault: assign {} bit {} ({:?})",
                    fault.assign_uuid, fault.bit_pos, fault.mode
                );
                fault_armed = true;
            }
        }
    }

    match engine {
        Engine::Csim => sim.exec_csim(usize::MAX)?,
        Engine::Rtl => sim.exec_rtl(false, false)?,
    }

    let out = collect_gemm(&sim, &plan, &a, &b, m, depth, n)?;
    let expected = gemm_reference(&a, &b, &c, m, depth, n, plan.out_m, plan.out_n);

    let worst = max_rel_error(&expected, &out);
    println!("cycles: {}", sim.cycle_count());
    println!("array error flag: {}", sim.error_detected());
    println!("max relative error vs reference: {worst:.3e}");
    println!(
        "diagnostics: {} warnings, {} soft errors, {} fault events",
        sim.diag.warnings, sim.diag.soft_errors, sim.diag.fault_events
    );

    if !fault_armed {
        if sim.error_detected() {
            bail!("false positive: array error flag raised with no fault injected");
        }
        if worst > REL_TOLERANCE {
            bail!("result off by {worst:.3e} (tolerance {REL_TOLERANCE:.1e})");
        }
        println!("result matches reference");
    }

    Ok(())
}

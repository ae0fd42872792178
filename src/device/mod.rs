//! Device model: array configuration and the port-level view of the array.
//!
//! This module provides:
//! - Array geometry and pipeline timing constants ([`config`])
//! - The opaque port trait the schedulers drive ([`port`])
//! - A behavioral implementation of that trait ([`behavioral`])
//!
//! # Port Architecture
//!
//! The scheduler only ever talks to the array through its ports:
//!
//! ```text
//!              multLeft[m*Kmma+k]      multRight[k]
//!                    |                      |
//!                    v                      v
//!   acc[m] --> +--------------------------------+ --> out[m]
//!              |   Mmma x Kmma systolic array   |
//!              |  (two phase-shifted FMAs/row)  | --> error
//!              +--------------------------------+
//! ```
//!
//! A Verilated netlist and the behavioral array implement the same trait;
//! everything above the ports is shared between the two builds.

pub mod behavioral;
pub mod config;
pub mod port;

pub use behavioral::BehavioralArray;
pub use config::SaConfig;
pub use port::SystolicPort;

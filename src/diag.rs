//! Diagnostics sink owned by the simulator.
//!
//! Replaces process-global warning/error counters with a value the host can
//! inspect after a run. Soft conditions (an RTL error flag, a masked fault)
//! are counted here and logged; hard failures travel as [`crate::SimError`].

/// Counters accumulated over a simulator's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Warnings emitted.
    pub warnings: u64,
    /// Soft errors (conditions recorded but not propagated).
    pub soft_errors: u64,
    /// Fault-injection events (faults chosen, values corrupted).
    pub fault_events: u64,
}

impl Diagnostics {
    /// Record a warning.
    pub fn warning(&mut self, msg: impl AsRef<str>) {
        log::warn!("{}", msg.as_ref());
        self.warnings += 1;
    }

    /// Record a soft error.
    pub fn soft_error(&mut self, msg: impl AsRef<str>) {
        log::error!("{}", msg.as_ref());
        self.soft_errors += 1;
    }

    /// Record a fault-injection event.
    pub fn fault_event(&mut self, msg: impl AsRef<str>) {
        log::info!("{}", msg.as_ref());
        self.fault_events += 1;
    }

    /// Reset all counters.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

//! Error types for the simulator.
//!
//! All fallible operations in the library return [`SimError`]; the binary
//! wraps them in `anyhow` at its boundary. The RTL `error` port is *not* an
//! error here — it is a soft flag recorded on the simulator and queried via
//! `error_detected()`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised by the simulator core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A codec or packed-lane operation was asked for an element width the
    /// datapath does not implement (only the 65-bit lane format is packed).
    #[error("unsupported element width {width} bits (only 65-bit lanes are implemented)")]
    UnsupportedWidth {
        /// The requested element width in bits.
        width: usize,
    },

    /// Destination buffer cannot hold the requested bit range.
    #[error("destination buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required to hold the range.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// A packed lane position does not fit into the buffer.
    #[error("lane {pos} does not fit into a {have}-byte buffer")]
    LaneOutOfRange {
        /// The requested lane index.
        pos: usize,
        /// Bytes available in the buffer.
        have: usize,
    },

    /// Corruption was requested on a bit outside a 64-bit word.
    #[error("bit position {bit} outside a 64-bit word")]
    BitOutOfRange {
        /// The offending bit position.
        bit: u8,
    },

    /// A fault selector carried a `None` variant where a concrete choice is
    /// required.
    #[error("cannot set a fault from a None-valued selector")]
    NoneFault,

    /// A transient fault was requested while no jobs are queued, so there is
    /// no cycle window to draw the fault cycle from.
    #[error("transient fault requested with an empty job queue")]
    EmptyQueue,

    /// `fi_reset_*` was called without a fault being set.
    #[error("no fault was set")]
    NoFaultSet,

    /// A matrix handle does not refer to a loaded matrix.
    #[error("unknown matrix handle {id}")]
    UnknownMatrix {
        /// The raw handle value.
        id: usize,
    },

    /// A job's row stride is smaller than its row length.
    #[error("row stride {stride} smaller than row length {min}")]
    StrideTooSmall {
        /// The offending stride.
        stride: usize,
        /// Minimum allowed stride.
        min: usize,
    },

    /// A job's matrix region extends past the end of its buffer.
    #[error("matrix region needs {needed} elements, buffer holds {have}")]
    RegionOutOfBounds {
        /// Elements required by the region.
        needed: usize,
        /// Elements in the buffer.
        have: usize,
    },

    /// A port index (row or k-lane) is outside the instantiated array.
    #[error("{port} port index {index} outside limit {limit}")]
    PortIndexOutOfRange {
        /// Which port was addressed.
        port: &'static str,
        /// The offending index.
        index: usize,
        /// Exclusive upper bound.
        limit: usize,
    },

    /// The I/O driver was invoked on an empty job queue.
    #[error("I/O driver invoked with an empty job queue")]
    QueueEmpty,

    /// A job's cycle counter passed the retirement threshold without the job
    /// being removed.
    #[error("job cycle {cycle} exceeded retirement threshold {limit}")]
    JobOverrun {
        /// The observed job cycle.
        cycle: usize,
        /// The retirement threshold.
        limit: usize,
    },

    /// An output position was scheduled past the last column; the job should
    /// already have retired.
    #[error("output column {n} scheduled past the last column {limit}")]
    OutputOverrun {
        /// The scheduled column.
        n: usize,
        /// Exclusive column limit.
        limit: usize,
    },

    /// Two queued jobs that can be in flight together violate the
    /// read-before-write rule (output region of one is an input or output of
    /// the other).
    #[error("read-before-write hazard between queued jobs {earlier} and {later}")]
    ReadBeforeWrite {
        /// Queue index of the earlier job.
        earlier: usize,
        /// Queue index of the later job.
        later: usize,
    },

    /// The netlist fault injector could not produce a fault site.
    #[error("netlist fault injector has no fault sites")]
    NoFaultSites,
}

//! Jobs, matrix handles, and the queue entry model.
//!
//! The simulator owns all matrix storage. Callers load row-major buffers
//! and get back [`MatrixId`] handles; a job references its three matrices
//! through `(handle, element offset, row stride)` triples, so fanning a
//! tile out into MMA-sized jobs is pure offset arithmetic and the
//! read-before-write hazard check reduces to handle-identity comparison.

use std::collections::VecDeque;

use crate::error::{Result, SimError};

/// Handle to a matrix buffer owned by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixId(pub(crate) usize);

/// Matrix storage owned by one simulator instance.
#[derive(Debug, Default)]
pub struct MatrixPool {
    mats: Vec<Vec<f64>>,
}

impl MatrixPool {
    /// Take ownership of a buffer and return its handle.
    pub fn insert(&mut self, data: Vec<f64>) -> MatrixId {
        self.mats.push(data);
        MatrixId(self.mats.len() - 1)
    }

    /// Borrow a buffer.
    pub fn get(&self, id: MatrixId) -> Result<&[f64]> {
        self.mats
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or(SimError::UnknownMatrix { id: id.0 })
    }

    /// Borrow a buffer mutably.
    pub fn get_mut(&mut self, id: MatrixId) -> Result<&mut [f64]> {
        self.mats
            .get_mut(id.0)
            .map(Vec::as_mut_slice)
            .ok_or(SimError::UnknownMatrix { id: id.0 })
    }
}

/// A view into a pooled matrix: base offset plus row stride, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatRef {
    /// The underlying buffer.
    pub mat: MatrixId,
    /// Element offset of the view's `[0, 0]`.
    pub offset: usize,
    /// Row stride in elements.
    pub stride: usize,
}

impl MatRef {
    /// A view at the start of a buffer.
    pub fn new(mat: MatrixId, stride: usize) -> Self {
        Self {
            mat,
            offset: 0,
            stride,
        }
    }

    /// The same view shifted forward by `delta` elements.
    pub fn with_offset(self, delta: usize) -> Self {
        Self {
            offset: self.offset + delta,
            ..self
        }
    }

    /// Whether two views name the same region (same buffer, same origin).
    /// This is the handle analogue of pointer equality.
    pub fn aliases(&self, other: &MatRef) -> bool {
        self.mat == other.mat && self.offset == other.offset
    }

    /// Element index of `[row, col]` within the underlying buffer.
    #[inline]
    pub(crate) fn index(&self, row: usize, col: usize) -> usize {
        self.offset + row * self.stride + col
    }
}

/// One MMA invocation: `C += A * B` over the configured MMA shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmaJob {
    /// Row-major `Mmma x Kmma` input, stride >= Kmma.
    pub mat_a: MatRef,
    /// Row-major `Kmma x Nmma` input, stride >= Nmma.
    pub mat_b: MatRef,
    /// Row-major `Mmma x Nmma` read-modify-write output, stride >= Nmma.
    pub mat_c: MatRef,
}

/// Queue entry: a job plus its local half-cycle counter.
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    /// Half-cycles this job has spent since entering the pipeline.
    pub job_cycle: usize,
    /// The job itself.
    pub job: MmaJob,
}

/// Validate that a `rows x cols` view fits its buffer.
pub(crate) fn check_region(
    pool: &MatrixPool,
    mat: &MatRef,
    rows: usize,
    cols: usize,
) -> Result<()> {
    if mat.stride < cols {
        return Err(SimError::StrideTooSmall {
            stride: mat.stride,
            min: cols,
        });
    }
    let have = pool.get(mat.mat)?.len();
    let needed = mat.offset + (rows - 1) * mat.stride + cols;
    if needed > have {
        return Err(SimError::RegionOutOfBounds { needed, have });
    }
    Ok(())
}

/// Read-before-write check over the queue: for any pair of jobs close
/// enough to be in flight together, the earlier job's output region must
/// not be an input or output region of the later one. Returns the first
/// offending pair.
pub(crate) fn read_before_write(
    queue: &VecDeque<QueueEntry>,
    jobs_in_pipe: usize,
) -> Option<(usize, usize)> {
    for earlier in 0..queue.len() {
        let limit = (earlier + jobs_in_pipe).min(queue.len());
        for later in earlier + 1..limit {
            let out = &queue[earlier].job.mat_c;
            let next = &queue[later].job;
            if out.aliases(&next.mat_a) || out.aliases(&next.mat_b) || out.aliases(&next.mat_c) {
                return Some((earlier, later));
            }
        }
    }
    None
}

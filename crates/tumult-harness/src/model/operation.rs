//! Operations for model-based testing of the free pool.

use arbitrary::Arbitrary;

/// Operations that can be applied to a pool.
///
/// Positions and indices are small integers so generated sequences hit the
/// boundaries (empty pool, last position, out of range) often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum PoolOperation {
    /// Check out the free instance at a free-list position.
    Checkout {
        /// Position in the free list.
        position: u8,
        /// Remove the instance from the free list.
        exclusive: bool,
    },

    /// Check out a free instance picked by the environment's RNG.
    CheckoutRandom {
        /// Remove the instance from the free list.
        exclusive: bool,
    },

    /// Return the instance with this 1-based index.
    Return {
        /// Instance index.
        index: u8,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Checkout succeeded with the instance of this 1-based index.
    CheckedOut(usize),

    /// Return succeeded.
    Returned,

    /// Operation failed.
    Error(OperationError),
}

/// Failures a pool operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// No free instance.
    Exhausted,

    /// Position past the end of the free list.
    OutOfRange,

    /// Instance was not checked out exclusively.
    NotCheckedOut,

    /// No instance has this index.
    InvalidIndex,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

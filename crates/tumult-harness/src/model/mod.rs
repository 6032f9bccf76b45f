//! Reference model of the instance free pool.
//!
//! The model keeps the pool as two plain vectors and applies each operation
//! in the most obvious way. It is the oracle the real
//! [`tumult_core::Population`] is checked against.

mod operation;
mod pool;

pub use operation::{OperationError, OperationResult, PoolOperation};
pub use pool::ModelPool;

//! The model pool.

use tumult_core::Environment;

use super::operation::{OperationError, OperationResult, PoolOperation};

/// Free pool of `n` instances, identified by 1-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPool {
    /// Free instances in free-list order.
    free: Vec<usize>,
    /// Exclusively checked-out instances, sorted.
    checked_out: Vec<usize>,
    len: usize,
}

impl ModelPool {
    /// Pool with every instance free, in index order.
    pub fn new(len: usize) -> Self {
        Self { free: (1..=len).collect(), checked_out: Vec::new(), len }
    }

    /// Population size.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty population.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free instances.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// True if instance `index` is checked out exclusively.
    pub fn is_checked_out(&self, index: usize) -> bool {
        self.checked_out.binary_search(&index).is_ok()
    }

    /// Apply an operation. Random checkouts draw from `env` exactly like the
    /// real pool does.
    pub fn apply(&mut self, op: PoolOperation, env: &dyn Environment) -> OperationResult {
        match op {
            PoolOperation::Checkout { position, exclusive } => self.checkout(usize::from(position), exclusive),
            PoolOperation::CheckoutRandom { exclusive } => {
                let position = env.random_index(self.free.len());
                self.checkout(position, exclusive)
            },
            PoolOperation::Return { index } => self.give_back(usize::from(index)),
        }
    }

    fn checkout(&mut self, position: usize, exclusive: bool) -> OperationResult {
        if self.free.is_empty() {
            return OperationResult::Error(OperationError::Exhausted);
        }
        if position >= self.free.len() {
            return OperationResult::Error(OperationError::OutOfRange);
        }
        if !exclusive {
            return OperationResult::CheckedOut(self.free[position]);
        }

        let index = self.free.remove(position);
        if let Err(at) = self.checked_out.binary_search(&index) {
            self.checked_out.insert(at, index);
        }
        OperationResult::CheckedOut(index)
    }

    fn give_back(&mut self, index: usize) -> OperationResult {
        if index == 0 || index > self.len {
            return OperationResult::Error(OperationError::InvalidIndex);
        }
        match self.checked_out.binary_search(&index) {
            Ok(at) => {
                self.checked_out.remove(at);
                self.free.push(index);
                OperationResult::Returned
            },
            Err(_) => OperationResult::Error(OperationError::NotCheckedOut),
        }
    }
}

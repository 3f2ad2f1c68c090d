//! Fault injection for the in-memory collaborators.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Per-operation countdown of forced failures.
#[derive(Debug)]
pub(crate) struct FaultPlan<Op> {
    pending: Mutex<HashMap<Op, usize>>,
}

impl<Op: Copy + Eq + Hash> FaultPlan<Op> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls of `op`.
    pub(crate) fn arm(&self, op: Op, times: usize) {
        *self.pending.lock().entry(op).or_insert(0) += times;
    }

    /// Consume one armed failure for `op`, if any.
    pub(crate) fn trip(&self, op: Op) -> bool {
        let mut pending = self.pending.lock();
        match pending.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }
}

//! Per-run ceiling on outbound calls to the remote API.
//!
//! One `RequestBudget` is created by the orchestrator at the start of a run
//! and lent by reference to every component that makes remote calls.
use std::sync::atomic::{AtomicU32, Ordering};

pub const DEFAULT_REQUEST_BUDGET: u32 = 150;

#[derive(Debug)]
pub struct RequestBudget {
    ceiling: u32,
    remaining: AtomicU32,
}

impl RequestBudget {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            remaining: AtomicU32::new(ceiling),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn consumed(&self) -> u32 {
        self.ceiling - self.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Take `n` units. Leaves the balance untouched and returns `false` when
    /// fewer than `n` remain.
    pub fn try_consume(&self, n: u32) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(n))
            .is_ok()
    }
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_BUDGET)
    }
}

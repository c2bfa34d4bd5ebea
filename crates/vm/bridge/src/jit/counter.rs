//! Bootstrap counters.
//!
//! Tracks how many methods the managed compiler has produced code for and
//! whether any compile request completed since bootstrap started. Both are
//! written by concurrently running compile workers and read, without locks,
//! by the bootstrap drain loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Thread-safe counters shared by the dispatcher and the bootstrap orchestrator.
///
/// `methods_compiled` only grows on a confirmed success with an artifact.
/// `request_handled` is sticky: once set it stays set until the next
/// bootstrap run resets it.
#[derive(Debug, Default)]
pub struct BootstrapCounters {
    methods_compiled: AtomicU64,
    request_handled: AtomicBool,
}

impl BootstrapCounters {
    pub fn new() -> Self {
        Self {
            methods_compiled: AtomicU64::new(0),
            request_handled: AtomicBool::new(false),
        }
    }

    /// Count one compiled method. Returns the new total.
    pub fn record_compiled(&self) -> u64 {
        self.methods_compiled
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    pub fn methods_compiled(&self) -> u64 {
        self.methods_compiled.load(Ordering::Acquire)
    }

    /// Note that a compile request finished, successfully or not.
    pub fn mark_request_handled(&self) {
        self.request_handled.store(true, Ordering::Release);
    }

    pub fn request_handled(&self) -> bool {
        self.request_handled.load(Ordering::Acquire)
    }

    /// Clear both counters at the start of a bootstrap run.
    pub(crate) fn reset(&self) {
        self.methods_compiled.store(0, Ordering::Release);
        self.request_handled.store(false, Ordering::Release);
    }
}

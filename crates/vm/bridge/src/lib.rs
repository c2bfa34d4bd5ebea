//! # jitbridge
//!
//! Bridge between a native VM's compile queue and an out-of-process managed
//! JIT compiler.
//!
//! ## Overview
//!
//! The VM hands compile tasks to worker threads; each worker calls into the
//! [`jit::dispatch::CompileDispatcher`], which forwards the request across the
//! boundary, contains whatever the managed side throws, and reconciles the
//! outcome into a [`jit::types::CompileResult`].
//!
//! Before the managed compiler may compile application code it warms itself
//! up: the [`jit::bootstrap::BootstrapOrchestrator`] seeds the same compile
//! queue with a curated method set, polls the queue until it drains and only
//! then flips the compiler into steady state.
//!
//! ```text
//! VM compile queue ──► CompileDispatcher::dispatch(task)
//!                          │  (OSR dropped while bootstrapping)
//!                          ▼
//!                    ManagedCompiler::compile_method
//!                          │
//!                          ▼
//!                    CompileResult ──► BootstrapCounters / BridgeMetrics
//! ```
//!
//! ## Key Components
//!
//! - [`jit::context::BridgeContext`]: composition root owning all shared state
//! - [`jit::bootstrap`]: drain state machine and the one-shot bootstrap run
//! - [`jit::dispatch`]: per-request dispatch and result reconciliation
//! - [`jit::compiler_thread`]: in-process worker-pool compile queue
//! - [`jit::optimizer`]: scan-for-lowest-set-bit intrinsic and its folding rule

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::arithmetic_side_effects,
        clippy::indexing_slicing
    )
)]

pub mod errors;
pub mod jit;

#[cfg(test)]
mod tests;

//! Compile-bridge infrastructure.
//!
//! This module holds the state shared between the VM compile workers and the
//! managed compiler: request/outcome value types, bootstrap counters, the
//! installed-code cache, the dispatch path, the bootstrap orchestration and
//! the node rewrite rule for the bit-scan intrinsic.
//!
//! The managed compiler itself is an injected [`dispatch::ManagedCompiler`]
//! so the bridge stays free of any particular compiler runtime.

pub mod bootstrap;
pub mod cache;
pub mod compiler_thread;
pub mod context;
pub mod counter;
pub mod dispatch;
pub mod optimizer;
pub mod types;

//! Error types for the compile bridge.

use std::any::Any;

use crate::jit::types::{CompileId, CompilerState};

/// Errors returned by [`crate::jit::dispatch::CompileDispatcher::dispatch`].
///
/// Compile failures are not errors: they are reported as
/// [`crate::jit::types::CompileResult::Failure`]. These variants describe
/// requests the bridge could not process at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The compiler is neither bootstrapping nor in steady state.
    #[error("compiler is not accepting requests in state {0:?}")]
    NotReady(CompilerState),

    /// The managed side returned no outcome object at all.
    ///
    /// This is fatal to the compile worker that issued the request, not to
    /// the process.
    #[error("managed compiler returned no outcome for compile {0}")]
    MissingOutcome(CompileId),
}

/// Errors returned by [`crate::jit::bootstrap::BootstrapOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    /// Bootstrap was requested while the compiler was not `Initialized`.
    #[error("bootstrap requires an initialized compiler, state is {0:?}")]
    InvalidState(CompilerState),
}

/// Errors returned by compile queue implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue has been shut down and accepts no more tasks.
    #[error("compile queue is disconnected")]
    Disconnected,
}

/// Errors returned when attaching an artifact to a compile request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    /// The request already carries an installed artifact.
    #[error("compile {0} already installed an artifact")]
    AlreadyInstalled(CompileId),
}

/// A compare-and-set on the compiler state lost against another writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move compiler from {from:?} to {to:?}: state is {found:?}")]
pub struct StateTransitionError {
    pub from: CompilerState,
    pub to: CompilerState,
    pub found: CompilerState,
}

/// An uncaught error raised on the managed side of the bridge.
///
/// Never propagated past the dispatch boundary; the dispatcher logs it and
/// converts it into a non-retryable compile failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct ManagedException {
    /// Human-readable description (exception class and message).
    pub description: String,
    /// Stack frames, innermost first.
    pub stack_trace: Vec<String>,
}

impl ManagedException {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            stack_trace: Vec::new(),
        }
    }

    /// Append a stack frame.
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack_trace.push(frame.into());
        self
    }

    /// Build an exception from a panic payload caught at the boundary.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::new(format!("panic in managed compiler: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_exception_from_str_panic() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let exception = ManagedException::from_panic(payload);
        assert_eq!(exception.description, "panic in managed compiler: boom");
        assert!(exception.stack_trace.is_empty());
    }

    #[test]
    fn test_managed_exception_from_string_panic() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("index out of bounds"));
        let exception = ManagedException::from_panic(payload);
        assert!(exception.description.ends_with("index out of bounds"));
    }

    #[test]
    fn test_managed_exception_frames_keep_order() {
        let exception = ManagedException::new("java.lang.NullPointerException")
            .with_frame("Graph.add")
            .with_frame("Compiler.compile");
        assert_eq!(exception.to_string(), "java.lang.NullPointerException");
        assert_eq!(exception.stack_trace, vec!["Graph.add", "Compiler.compile"]);
    }
}

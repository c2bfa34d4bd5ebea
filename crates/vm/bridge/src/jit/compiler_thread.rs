//! Background compile workers.
//!
//! Provides an in-process [`CompileQueue`]: a multi-consumer channel drained
//! by a fixed pool of named worker threads. Each worker hands the tasks it
//! receives to a handler (normally [`super::dispatch::CompileDispatcher::dispatch`]).
//!
//! A task counts towards `queue_depth` from the moment it is enqueued until
//! its handler returns, so an empty queue means every submitted task has
//! been fully handled.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use super::bootstrap::CompileQueue;
use super::types::{CompileTask, CompileTier};
use crate::errors::QueueError;

/// Pending-task counters, one per tier.
#[derive(Debug, Default)]
struct TierDepth {
    simple: AtomicUsize,
    full_optimization: AtomicUsize,
}

impl TierDepth {
    fn slot(&self, tier: CompileTier) -> &AtomicUsize {
        match tier {
            CompileTier::Simple => &self.simple,
            CompileTier::FullOptimization => &self.full_optimization,
        }
    }
}

/// Decrements the pending count when a task is done, even if its handler panicked.
struct PendingGuard<'a> {
    slot: &'a AtomicUsize,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.slot.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to the background compile worker pool.
///
/// On `Drop`, the sender is closed (causing every worker's `recv()` to
/// return `Err`) and the workers are joined. Tasks still queued at that
/// point are handled before the workers exit.
pub struct CompilerThreadPool {
    sender: Option<Sender<CompileTask>>,
    handles: Vec<thread::JoinHandle<()>>,
    depth: Arc<TierDepth>,
}

impl CompilerThreadPool {
    /// Start `workers` background threads (at least one).
    ///
    /// The `handler` closure is invoked on a worker thread for each task.
    /// Handler errors are the handler's business; the pool only tracks
    /// completion.
    pub fn start<F>(workers: usize, handler: F) -> Self
    where
        F: Fn(CompileTask) + Send + Sync + 'static,
    {
        let (sender, receiver) = channel::unbounded::<CompileTask>();
        let handler = Arc::new(handler);
        let depth = Arc::new(TierDepth::default());

        let handles = (0..workers.max(1))
            .map(|index| {
                spawn_worker(
                    index,
                    receiver.clone(),
                    Arc::clone(&handler),
                    Arc::clone(&depth),
                )
            })
            .collect();

        Self {
            sender: Some(sender),
            handles,
            depth,
        }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }
}

#[expect(clippy::expect_used, reason = "thread spawn failure is unrecoverable")]
fn spawn_worker<F>(
    index: usize,
    receiver: Receiver<CompileTask>,
    handler: Arc<F>,
    depth: Arc<TierDepth>,
) -> thread::JoinHandle<()>
where
    F: Fn(CompileTask) + Send + Sync + 'static,
{
    thread::Builder::new()
        .name(format!("compile-worker-{index}"))
        .spawn(move || {
            while let Ok(task) = receiver.recv() {
                let _pending = PendingGuard {
                    slot: depth.slot(task.tier()),
                };
                handler(task);
            }
            // Channel closed, worker exits cleanly
        })
        .expect("failed to spawn compile worker thread")
}

impl CompileQueue for CompilerThreadPool {
    fn queue_depth(&self, tier: CompileTier) -> usize {
        self.depth.slot(tier).load(Ordering::Acquire)
    }

    fn enqueue(&self, task: CompileTask) -> Result<(), QueueError> {
        let sender = self.sender.as_ref().ok_or(QueueError::Disconnected)?;
        let slot = self.depth.slot(task.tier());
        slot.fetch_add(1, Ordering::AcqRel);
        debug!(compile_id = %task.id(), method = %task.method(), "Enqueued compile task");
        sender.send(task).map_err(|_| {
            slot.fetch_sub(1, Ordering::AcqRel);
            QueueError::Disconnected
        })
    }
}

impl Drop for CompilerThreadPool {
    fn drop(&mut self) {
        // Drop the sender first so every worker's recv() returns Err
        drop(self.sender.take());

        for handle in self.handles.drain(..) {
            if let Err(panic_payload) = handle.join() {
                // Log but don't re-panic during drop (double-panic = abort)
                error!(
                    payload = ?panic_payload.downcast_ref::<&str>(),
                    "Compile worker panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for CompilerThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerThreadPool")
            .field("active", &self.sender.is_some())
            .field("workers", &self.handles.len())
            .field("depth", &self.depth)
            .finish()
    }
}

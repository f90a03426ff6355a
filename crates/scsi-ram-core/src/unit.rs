//! Logical units and their dispatch model.
//!
//! A unit either executes each command on the submitting thread (inline) or
//! appends it to a FIFO drained by one dedicated worker thread (queued). In
//! both modes the completion sink sees every submitted command exactly once.

use crate::command::{Command, HostStatus};
use crate::config::TargetConfig;
use crate::exec::Executor;
use crate::page::{HeapPageAllocator, PageAllocator};
use crate::stats::UnitStatsSnapshot;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Receives finished commands.
pub trait CompletionSink: Send + Sync {
    /// Called exactly once per submitted command.
    fn complete(&self, cmd: Command);
}

impl<F> CompletionSink for F
where
    F: Fn(Command) + Send + Sync,
{
    fn complete(&self, cmd: Command) {
        self(cmd);
    }
}

/// Address of a logical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId {
    /// Target id on the host.
    pub target: u8,
    /// Logical unit number.
    pub lun: u64,
}

impl UnitId {
    /// Build an id.
    #[must_use]
    pub const fn new(target: u8, lun: u64) -> Self {
        Self { target, lun }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.lun)
    }
}

/// How submitted commands reach the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Executed and completed before `submit` returns.
    Inline,
    /// Queued for the unit's worker thread.
    Queued,
}

impl DispatchMode {
    fn from_config(config: &TargetConfig) -> Self {
        if config.use_worker_thread {
            Self::Queued
        } else {
            Self::Inline
        }
    }
}

/// Queue entry wrapping a command with its submission order.
struct QueuedCommand {
    seq: u64,
    cmd: Command,
    queued_at: Instant,
}

#[derive(Default)]
struct UnitQueue {
    pending: VecDeque<QueuedCommand>,
    next_seq: u64,
    stopping: bool,
}

struct UnitShared {
    id: UnitId,
    queue: Mutex<UnitQueue>,
    wake: Condvar,
    executor: Executor,
    sink: Arc<dyn CompletionSink>,
}

impl UnitShared {
    fn complete(&self, cmd: Command) {
        self.sink.complete(cmd);
    }

    fn reject(&self, mut cmd: Command, status: HostStatus) {
        cmd.set_host_status(status);
        if status == HostStatus::Abort {
            self.executor.stats().record_abort();
        }
        self.complete(cmd);
    }
}

/// One emulated storage device.
pub struct LogicalUnit {
    shared: Arc<UnitShared>,
    mode: DispatchMode,
    worker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl LogicalUnit {
    /// Create a unit with a heap-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] or [`Error::OutOfMemory`] if the store
    /// cannot be built, or [`Error::WorkerSpawn`] if the worker thread cannot
    /// be started. Nothing is left allocated on error.
    pub fn new(id: UnitId, config: &TargetConfig, sink: Arc<dyn CompletionSink>) -> Result<Self> {
        Self::with_allocator(id, config, sink, Arc::new(HeapPageAllocator))
    }

    /// Create a unit whose store draws pages from `allocator`.
    ///
    /// # Errors
    ///
    /// Same as [`LogicalUnit::new`].
    pub fn with_allocator(
        id: UnitId,
        config: &TargetConfig,
        sink: Arc<dyn CompletionSink>,
        allocator: Arc<dyn PageAllocator>,
    ) -> Result<Self> {
        let executor = Executor::with_allocator(config, allocator)?;
        let mode = DispatchMode::from_config(config);
        let shared = Arc::new(UnitShared {
            id,
            queue: Mutex::new(UnitQueue::default()),
            wake: Condvar::new(),
            executor,
            sink,
        });

        let worker = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Queued => {
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name(format!("scsi_ram_{}", id.target))
                    .spawn(move || worker_loop(&worker_shared))
                    .map_err(Error::WorkerSpawn)?;
                Some(handle)
            }
        };

        tracing::info!(
            unit = %id,
            ?mode,
            sector_size = config.sector_size,
            capacity_blocks = config.capacity_blocks,
            "Logical unit created"
        );

        Ok(Self { shared, mode, worker: Mutex::new(worker), shut_down: AtomicBool::new(false) })
    }

    /// Unit address.
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.shared.id
    }

    /// Dispatch mode fixed at creation.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Logical block size in bytes.
    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.shared.executor.sector_size()
    }

    /// Number of logical blocks.
    #[must_use]
    pub fn capacity_blocks(&self) -> u32 {
        self.shared.executor.capacity_blocks()
    }

    /// Toggle copy-skipping for WRITE commands.
    pub fn set_discard_writes(&self, discard: bool) {
        tracing::info!(unit = %self.id(), discard, "discard_writes changed");
        self.shared.executor.set_discard_writes(discard);
    }

    /// Toggle copy-skipping for READ commands.
    pub fn set_discard_reads(&self, discard: bool) {
        tracing::info!(unit = %self.id(), discard, "discard_reads changed");
        self.shared.executor.set_discard_reads(discard);
    }

    /// Current discard-writes toggle.
    #[must_use]
    pub fn discard_writes(&self) -> bool {
        self.shared.executor.discard_writes()
    }

    /// Current discard-reads toggle.
    #[must_use]
    pub fn discard_reads(&self) -> bool {
        self.shared.executor.discard_reads()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> UnitStatsSnapshot {
        self.shared.executor.stats().snapshot()
    }

    /// Commands waiting for the worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    /// True once [`LogicalUnit::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hand a command to the unit.
    ///
    /// Inline units complete it before returning. Queued units append it and
    /// return at once. A unit that is stopping completes it with BAD TARGET.
    pub fn submit(&self, mut cmd: Command) {
        match self.mode {
            DispatchMode::Inline => {
                if self.shared.queue.lock().stopping {
                    self.shared.reject(cmd, HostStatus::BadTarget);
                    return;
                }
                self.shared.executor.execute(&mut cmd);
                self.shared.complete(cmd);
            }
            DispatchMode::Queued => {
                let mut queue = self.shared.queue.lock();
                if queue.stopping {
                    drop(queue);
                    self.shared.reject(cmd, HostStatus::BadTarget);
                    return;
                }
                let seq = queue.next_seq;
                queue.next_seq += 1;
                let was_empty = queue.pending.is_empty();
                queue.pending.push_back(QueuedCommand { seq, cmd, queued_at: Instant::now() });
                drop(queue);

                tracing::debug!(unit = %self.id(), seq, "Queued command");
                if was_empty {
                    self.shared.wake.notify_one();
                }
            }
        }
    }

    /// Stop the unit: signal stop, wake and join the worker, abort anything
    /// still queued, then release the store. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.queue.lock().stopping = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                tracing::warn!(unit = %self.id(), "Shutdown from worker thread; not joining");
            } else if handle.join().is_err() {
                tracing::error!(unit = %self.id(), "Worker thread panicked");
            }
        }

        let leftovers: Vec<QueuedCommand> = self.shared.queue.lock().pending.drain(..).collect();
        if !leftovers.is_empty() {
            tracing::warn!(unit = %self.id(), count = leftovers.len(), "Aborting queued commands");
        }
        for entry in leftovers {
            self.shared.reject(entry.cmd, HostStatus::Abort);
        }

        self.shared.executor.release();
        tracing::info!(unit = %self.id(), "Logical unit destroyed");
    }
}

impl Drop for LogicalUnit {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for LogicalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalUnit")
            .field("id", &self.shared.id)
            .field("mode", &self.mode)
            .field("executor", &self.shared.executor)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(shared: &UnitShared) {
    tracing::info!(unit = %shared.id, "Worker started");
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.stopping {
                    break None;
                }
                if let Some(entry) = queue.pending.pop_front() {
                    break Some(entry);
                }
                shared.wake.wait(&mut queue);
            }
        };
        let Some(QueuedCommand { seq, mut cmd, queued_at }) = next else {
            break;
        };

        tracing::debug!(
            unit = %shared.id,
            seq,
            waited_us = u64::try_from(queued_at.elapsed().as_micros()).unwrap_or(u64::MAX),
            "Dispatching queued command"
        );
        shared.executor.execute(&mut cmd);
        shared.complete(cmd);
    }
    tracing::info!(unit = %shared.id, "Worker stopped");
}

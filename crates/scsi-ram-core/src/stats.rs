//! Per-unit command counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the executor.
#[derive(Debug, Default)]
pub struct UnitStats {
    commands: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    check_conditions: AtomicU64,
    aborts: AtomicU64,
}

impl UnitStats {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one executed command.
    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed READ moving `bytes` bytes.
    pub fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a completed WRITE moving `bytes` bytes.
    pub fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a CHECK CONDITION completion.
    pub fn record_check_condition(&self) {
        self.check_conditions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ABORT completion.
    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> UnitStatsSnapshot {
        UnitStatsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            check_conditions: self.check_conditions.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStatsSnapshot {
    /// Commands executed, including failed ones.
    pub commands: u64,
    /// READ(6)/READ(10) completed with GOOD status.
    pub reads: u64,
    /// WRITE(6)/WRITE(10) completed with GOOD status.
    pub writes: u64,
    /// Bytes copied out of the store.
    pub bytes_read: u64,
    /// Bytes copied into the store.
    pub bytes_written: u64,
    /// Commands completed with CHECK CONDITION.
    pub check_conditions: u64,
    /// Commands completed with host status ABORT.
    pub aborts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let stats = UnitStats::new();
        stats.record_command();
        stats.record_command();
        stats.record_read(512);
        stats.record_write(1024);
        stats.record_write(1024);
        stats.record_check_condition();
        stats.record_abort();

        let snap = stats.snapshot();
        assert_eq!(snap.commands, 2);
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.writes, 2);
        assert_eq!(snap.bytes_read, 512);
        assert_eq!(snap.bytes_written, 2048);
        assert_eq!(snap.check_conditions, 1);
        assert_eq!(snap.aborts, 1);
    }

    #[test]
    fn test_stats_snapshot_default() {
        assert_eq!(UnitStats::default().snapshot(), UnitStatsSnapshot::default());
    }
}

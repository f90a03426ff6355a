//! Error types for scsi-ram-core.
//!
//! These cover setup, teardown and API misuse only. A command that fails is
//! still completed normally; its outcome lives in the command's result fields.

use thiserror::Error;

/// Errors raised while building or tearing down targets.
#[derive(Debug, Error)]
pub enum Error {
    /// A page allocation failed; every page allocated so far was returned.
    #[error("out of memory: allocated {pages_allocated} of {pages_requested} pages")]
    OutOfMemory {
        /// Pages successfully allocated before the failure.
        pages_allocated: usize,
        /// Pages the store needed.
        pages_requested: usize,
    },

    /// The target configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Target id outside the host's table.
    #[error("target {target} out of range (max {max})")]
    InvalidTarget {
        /// Requested target id.
        target: u8,
        /// Highest valid target id.
        max: u8,
    },

    /// Only LUN 0 is backed by a store.
    #[error("target {target} has no lun {lun}")]
    UnsupportedLun {
        /// Target id.
        target: u8,
        /// Requested logical unit number.
        lun: u64,
    },

    /// A unit is already registered under this target id.
    #[error("target {0} already has a logical unit")]
    UnitExists(u8),

    /// No unit is registered under this target id.
    #[error("no logical unit on target {0}")]
    NoSuchUnit(u8),

    /// Page index past the end of the store.
    #[error("page {index} out of range ({pages} pages)")]
    PageOutOfRange {
        /// Requested page index.
        index: usize,
        /// Pages in the store.
        pages: usize,
    },

    /// A scatter-gather segment does not fit inside its buffer.
    #[error("segment offset {offset} + len {len} exceeds buffer of {buffer_len} bytes")]
    InvalidSegment {
        /// Segment start within the buffer.
        offset: usize,
        /// Segment length.
        len: usize,
        /// Length of the backing buffer.
        buffer_len: usize,
    },

    /// A command descriptor block is malformed.
    #[error("invalid CDB: {0}")]
    InvalidCdb(String),

    /// The per-unit worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Result type for target operations.
pub type Result<T> = std::result::Result<T, Error>;

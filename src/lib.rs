//! # scsi-ram
//!
//! RAM-backed SCSI target emulator.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - `scsi-ram-core` - command decoding, paged store, scatter-gather engine,
//!   logical units and host
//! - `scsi-ram-cli` - CLI tool (`scsi-ram` binary)

pub use scsi_ram_core::*;

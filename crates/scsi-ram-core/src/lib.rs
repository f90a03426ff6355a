//! RAM-backed SCSI target emulation.
//!
//! A [`Host`] owns up to [`MAX_TARGETS`] logical units. Each unit keeps its
//! data in a [`PagedStore`] of 4 KiB pages and answers INQUIRY, REPORT LUNS,
//! TEST UNIT READY, READ CAPACITY(10), MODE SENSE(6) and READ/WRITE in the 6-
//! and 10-byte forms. Commands run either inline on the submitting thread or
//! on a per-unit worker thread, and every command is handed back through a
//! [`CompletionSink`] exactly once.
//!
//! # Example
//!
//! ```
//! use std::sync::{mpsc, Arc, Mutex};
//! use scsi_ram_core::{Cdb, Command, Host, SgList, TargetConfig};
//!
//! let (tx, rx) = mpsc::channel();
//! let tx = Mutex::new(tx);
//! let sink = move |cmd: Command| {
//!     tx.lock().unwrap().send(cmd).unwrap();
//! };
//!
//! let config = TargetConfig::new().with_capacity_blocks(2048);
//! let host = Host::new(config, Arc::new(sink)).unwrap();
//! host.create_unit(0, 0).unwrap();
//!
//! let payload = vec![0xAB; 2048];
//! host.submit(0, 0, Command::with_sg(Cdb::rw10(true, 0, 4), SgList::chunked(&payload, 2048)));
//! host.submit(0, 0, Command::with_sg(Cdb::rw10(false, 0, 4), SgList::zeroed(1, 2048)));
//!
//! let _write = rx.recv().unwrap();
//! let read = rx.recv().unwrap();
//! assert!(read.result().is_good());
//! assert_eq!(read.sg.to_vec(), payload);
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cdb;
mod command;
mod config;
mod error;
pub mod exec;
mod host;
mod page;
pub mod sense;
pub mod sg;
mod stats;
mod unit;

pub use cdb::{Cdb, RwForm, ScsiOp};
pub use command::{Command, CommandResult, HostStatus, ScsiStatus};
pub use config::{TargetConfig, DEFAULT_CAPACITY_BLOCKS, DEFAULT_SECTOR_SIZE};
pub use error::{Error, Result};
pub use exec::Executor;
pub use host::{Host, MAX_TARGETS};
pub use page::{HeapPageAllocator, Page, PageAllocator, PagedStore};
pub use sense::{SenseKey, SenseRecord, SENSE_BUFFER_SIZE};
pub use sg::{Direction, SgList, SgSegment, TransferOutcome};
pub use stats::{UnitStats, UnitStatsSnapshot};
pub use unit::{CompletionSink, DispatchMode, LogicalUnit, UnitId};

/// Backing page size in bytes.
pub const PAGE_SIZE: usize = 4096;

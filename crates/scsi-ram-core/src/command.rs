//! Commands and their completion result.

use crate::cdb::Cdb;
use crate::sense::{SenseKey, SenseRecord, SENSE_BUFFER_SIZE};
use crate::sg::SgList;
use std::fmt;

/// Host (adapter) status, the high half of the result word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HostStatus {
    /// Command reached the unit.
    #[default]
    Ok = 0x00,
    /// No unit at the addressed target.
    BadTarget = 0x04,
    /// Command aborted by the target.
    Abort = 0x05,
}

/// SCSI status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ScsiStatus {
    /// Success.
    #[default]
    Good = 0x00,
    /// Sense data is valid.
    CheckCondition = 0x02,
}

/// Final outcome of a command.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Adapter-level status.
    pub host_status: HostStatus,
    /// SCSI status.
    pub status: ScsiStatus,
    /// Fixed-format sense; all zero unless `status` is CHECK CONDITION.
    pub sense: [u8; SENSE_BUFFER_SIZE],
    /// Requested bytes not transferred.
    pub residual: usize,
    /// Bytes actually moved to or from the segments.
    pub transferred: usize,
}

impl Default for CommandResult {
    fn default() -> Self {
        Self {
            host_status: HostStatus::Ok,
            status: ScsiStatus::Good,
            sense: [0; SENSE_BUFFER_SIZE],
            residual: 0,
            transferred: 0,
        }
    }
}

impl CommandResult {
    /// Result word as delivered to the bus layer: `host << 16 | status`.
    #[must_use]
    pub fn word(&self) -> u32 {
        (u32::from(self.host_status as u8) << 16) | u32::from(self.status as u8)
    }

    /// True for GOOD status with host OK.
    #[must_use]
    pub fn is_good(&self) -> bool {
        self.host_status == HostStatus::Ok && self.status == ScsiStatus::Good
    }

    /// Decoded sense, if the command ended in CHECK CONDITION.
    #[must_use]
    pub fn sense_record(&self) -> Option<SenseRecord> {
        if self.status != ScsiStatus::CheckCondition {
            return None;
        }
        SenseRecord::from_fixed(&self.sense)
    }
}

impl fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResult")
            .field("host_status", &self.host_status)
            .field("status", &self.status)
            .field("sense", &self.sense_record())
            .field("residual", &self.residual)
            .field("transferred", &self.transferred)
            .finish()
    }
}

/// One command: CDB, data segments and result slot.
///
/// The submitter owns the command until it is handed to a unit; it comes back
/// through the completion sink exactly once.
#[derive(Debug, Clone)]
pub struct Command {
    cdb: Cdb,
    /// Data segments.
    pub sg: SgList,
    result: CommandResult,
    tag: u64,
}

impl Command {
    /// A command with no data segments.
    #[must_use]
    pub fn new(cdb: Cdb) -> Self {
        Self::with_sg(cdb, SgList::new())
    }

    /// A command with the given data segments.
    #[must_use]
    pub fn with_sg(cdb: Cdb, sg: SgList) -> Self {
        Self { cdb, sg, result: CommandResult::default(), tag: 0 }
    }

    /// Attach a submitter-chosen tag.
    #[must_use]
    pub fn tagged(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    /// Submitter-chosen tag.
    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// The command descriptor block.
    #[must_use]
    pub fn cdb(&self) -> &Cdb {
        &self.cdb
    }

    /// The result slot.
    #[must_use]
    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    /// Split into data segments and result.
    #[must_use]
    pub fn into_parts(self) -> (SgList, CommandResult) {
        (self.sg, self.result)
    }

    /// Clear the result slot before execution.
    pub(crate) fn reset_result(&mut self) {
        self.result = CommandResult::default();
    }

    pub(crate) fn set_transfer(&mut self, transferred: usize, residual: usize) {
        self.result.transferred = transferred;
        self.result.residual = residual;
    }

    /// Complete with GOOD status. A residual left by a transfer is kept.
    pub fn set_success(&mut self) {
        self.result.host_status = HostStatus::Ok;
        self.result.status = ScsiStatus::Good;
        self.result.sense = [0; SENSE_BUFFER_SIZE];
    }

    /// Complete with CHECK CONDITION and fixed-format sense.
    pub fn set_error(&mut self, key: SenseKey, asc: u8, ascq: u8) {
        self.set_sense(SenseRecord::new(key, asc, ascq));
    }

    /// Complete with CHECK CONDITION carrying `record`.
    pub fn set_sense(&mut self, record: SenseRecord) {
        self.result.host_status = HostStatus::Ok;
        self.result.status = ScsiStatus::CheckCondition;
        self.result.sense = record.to_fixed();
    }

    /// Complete with a host-level status and no sense detail.
    pub fn set_host_status(&mut self, host_status: HostStatus) {
        self.result.host_status = host_status;
        self.result.status = ScsiStatus::Good;
        self.result.sense = [0; SENSE_BUFFER_SIZE];
        self.result.transferred = 0;
        self.result.residual = 0;
    }
}

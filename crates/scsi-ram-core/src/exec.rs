//! Command executor.
//!
//! Decodes a CDB, runs the opcode handler against the unit's store and writes
//! the outcome into the command's result slot. Per-command failures never
//! escape as [`crate::Error`]; they become status, sense and host status.

use crate::cdb::{ScsiOp, MODE_PAGE_ALL, MODE_PAGE_CACHING};
use crate::command::{Command, HostStatus, ScsiStatus};
use crate::config::TargetConfig;
use crate::page::{HeapPageAllocator, PageAllocator, PagedStore};
use crate::sense::SenseRecord;
use crate::sg::{self, TransferOutcome};
use crate::stats::UnitStats;
use crate::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Standard INQUIRY data: direct-access device, "Linux   RAM Drive       0.01".
pub const INQUIRY_DATA: [u8; 57] = inquiry_data();

/// VPD page 0x00: the only supported page is page 0x00 itself.
pub const VPD_SUPPORTED_PAGES: [u8; 5] = [0, 0, 0, 1, 0];

/// REPORT LUNS reply listing LUN 0 only.
pub const REPORT_LUNS_DATA: [u8; 16] = [0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// MODE SENSE(6) reply for the caching page and for "all pages".
pub const MODE_SENSE_CACHING: [u8; 7] = [6, 0, 0, 0, 8, 1, 0];

/// MODE SENSE(6) reply for any other page: header only.
pub const MODE_SENSE_HEADER: [u8; 4] = [3, 0, 0, 0];

const fn inquiry_data() -> [u8; 57] {
    let mut data = [0u8; 57];
    data[2] = 5;
    data[3] = 0x22;
    data[4] = 52;
    data[7] = 0x0a;
    let ident = *b"Linux   RAM Drive       0.01";
    let mut i = 0;
    while i < ident.len() {
        data[8 + i] = ident[i];
        i += 1;
    }
    data
}

/// Executes commands against one unit's paged store.
pub struct Executor {
    sector_size: u32,
    capacity_blocks: u32,
    store: RwLock<PagedStore>,
    discard_writes: AtomicBool,
    discard_reads: AtomicBool,
    stats: UnitStats,
}

impl Executor {
    /// Allocate the store described by `config` from the heap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for an unusable configuration
    /// or [`crate::Error::OutOfMemory`] if the store cannot be allocated.
    pub fn new(config: &TargetConfig) -> Result<Self> {
        Self::with_allocator(config, Arc::new(HeapPageAllocator))
    }

    /// Allocate the store using `allocator`.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::new`].
    pub fn with_allocator(config: &TargetConfig, allocator: Arc<dyn PageAllocator>) -> Result<Self> {
        config.validate()?;
        let store = PagedStore::allocate_with(config.capacity_bytes(), allocator)?;
        Ok(Self {
            sector_size: config.sector_size,
            capacity_blocks: config.capacity_blocks,
            store: RwLock::new(store),
            discard_writes: AtomicBool::new(config.discard_writes),
            discard_reads: AtomicBool::new(config.discard_reads),
            stats: UnitStats::new(),
        })
    }

    /// Logical block size in bytes.
    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Number of logical blocks.
    #[must_use]
    pub fn capacity_blocks(&self) -> u32 {
        self.capacity_blocks
    }

    /// Skip the copy for subsequent WRITEs.
    pub fn set_discard_writes(&self, discard: bool) {
        self.discard_writes.store(discard, Ordering::Relaxed);
    }

    /// Skip the copy for subsequent READs.
    pub fn set_discard_reads(&self, discard: bool) {
        self.discard_reads.store(discard, Ordering::Relaxed);
    }

    /// Current discard-writes toggle.
    #[must_use]
    pub fn discard_writes(&self) -> bool {
        self.discard_writes.load(Ordering::Relaxed)
    }

    /// Current discard-reads toggle.
    #[must_use]
    pub fn discard_reads(&self) -> bool {
        self.discard_reads.load(Ordering::Relaxed)
    }

    /// Command counters.
    #[must_use]
    pub fn stats(&self) -> &UnitStats {
        &self.stats
    }

    /// Pages currently held by the store.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.store.read().page_count()
    }

    /// True once the store has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.store.read().is_released()
    }

    /// Release the store. Waits for any command currently copying data.
    pub fn release(&self) {
        self.store.write().release();
    }

    /// Execute one command, leaving the outcome in its result slot.
    pub fn execute(&self, cmd: &mut Command) {
        cmd.reset_result();
        self.stats.record_command();

        let op = match ScsiOp::parse(cmd.cdb()) {
            Ok(op) => op,
            Err(e) => {
                tracing::debug!(cdb = ?cmd.cdb(), error = %e, "Rejected CDB");
                cmd.set_sense(SenseRecord::invalid_field_in_cdb());
                self.stats.record_check_condition();
                return;
            }
        };
        tracing::trace!(op = op.name(), cdb = ?cmd.cdb(), tag = cmd.tag(), "Executing command");

        if self.is_released() {
            cmd.set_host_status(HostStatus::BadTarget);
            return;
        }

        match op {
            ScsiOp::TestUnitReady => cmd.set_success(),
            ScsiOp::Inquiry { evpd: false, .. } => reply(cmd, &INQUIRY_DATA),
            ScsiOp::Inquiry { evpd: true, page_code: 0 } => reply(cmd, &VPD_SUPPORTED_PAGES),
            ScsiOp::Inquiry { evpd: true, page_code } => {
                tracing::debug!(page_code, "Unsupported VPD page");
                cmd.set_sense(SenseRecord::invalid_field_in_cdb());
            }
            ScsiOp::ReportLuns => reply(cmd, &REPORT_LUNS_DATA),
            ScsiOp::ReadCapacity => {
                let mut data = [0u8; 8];
                data[..4].copy_from_slice(&self.capacity_blocks.saturating_sub(1).to_be_bytes());
                data[4..].copy_from_slice(&self.sector_size.to_be_bytes());
                reply(cmd, &data);
            }
            ScsiOp::ModeSense { page_code, alloc_len } => {
                let data: &[u8] = if page_code == MODE_PAGE_CACHING || page_code == MODE_PAGE_ALL {
                    &MODE_SENSE_CACHING
                } else {
                    &MODE_SENSE_HEADER
                };
                let copied = cmd.sg.copy_from_buffer(&data[..data.len().min(usize::from(alloc_len))]);
                cmd.set_transfer(copied, 0);
                cmd.set_success();
            }
            ScsiOp::Read { lba, blocks, .. } => self.read(cmd, lba, blocks),
            ScsiOp::Write { lba, blocks, .. } => self.write(cmd, lba, blocks),
            ScsiOp::Unknown(opcode) => {
                tracing::warn!(opcode, "Unsupported opcode");
                cmd.set_host_status(HostStatus::Abort);
                self.stats.record_abort();
            }
        }

        if cmd.result().status == ScsiStatus::CheckCondition {
            self.stats.record_check_condition();
        }
    }

    /// Byte offset and length of a block range, or `None` if it runs past the
    /// end of the device.
    fn byte_range(&self, lba: u32, blocks: u32) -> Option<(u64, usize)> {
        let end = u64::from(lba) + u64::from(blocks);
        if end > u64::from(self.capacity_blocks) {
            return None;
        }
        let sector = u64::from(self.sector_size);
        let total = usize::try_from(u64::from(blocks) * sector).ok()?;
        Some((u64::from(lba) * sector, total))
    }

    fn check_range(&self, cmd: &mut Command, lba: u32, blocks: u32) -> Option<(u64, usize)> {
        let range = self.byte_range(lba, blocks);
        if range.is_none() {
            tracing::warn!(
                lba,
                blocks,
                capacity_blocks = self.capacity_blocks,
                "Request exceeded device capacity"
            );
            cmd.set_sense(SenseRecord::lba_out_of_range());
        }
        range
    }

    fn read(&self, cmd: &mut Command, lba: u32, blocks: u32) {
        let Some((offset, total)) = self.check_range(cmd, lba, blocks) else {
            return;
        };
        if self.discard_reads() {
            cmd.set_success();
            return;
        }
        let outcome = {
            let store = self.store.read();
            sg::read_into(&store, offset, total, &mut cmd.sg)
        };
        self.finish_transfer(cmd, outcome, |stats, n| stats.record_read(n));
    }

    fn write(&self, cmd: &mut Command, lba: u32, blocks: u32) {
        let Some((offset, total)) = self.check_range(cmd, lba, blocks) else {
            return;
        };
        if self.discard_writes() {
            cmd.set_success();
            return;
        }
        let outcome = {
            let mut store = self.store.write();
            sg::write_from(&mut store, offset, total, &cmd.sg)
        };
        self.finish_transfer(cmd, outcome, |stats, n| stats.record_write(n));
    }

    fn finish_transfer(
        &self,
        cmd: &mut Command,
        outcome: Result<TransferOutcome>,
        record: impl FnOnce(&UnitStats, usize),
    ) {
        match outcome {
            Ok(TransferOutcome { transferred, residual }) => {
                cmd.set_transfer(transferred, residual);
                cmd.set_success();
                record(&self.stats, transferred);
            }
            // Store released between the check above and the copy.
            Err(e) => {
                tracing::debug!(error = %e, "Transfer against released store");
                cmd.set_host_status(HostStatus::BadTarget);
            }
        }
    }
}

/// Copy a fixed reply into the command's segments and complete it. Reply
/// bytes with no segment space are reported as residual.
fn reply(cmd: &mut Command, data: &[u8]) {
    let copied = cmd.sg.copy_from_buffer(data);
    cmd.set_transfer(copied, data.len() - copied);
    cmd.set_success();
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("sector_size", &self.sector_size)
            .field("capacity_blocks", &self.capacity_blocks)
            .field("discard_writes", &self.discard_writes())
            .field("discard_reads", &self.discard_reads())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdb::{self, Cdb};
    use crate::page::test_support::CountingAllocator;
    use crate::sense::{SenseKey, ASC_INVALID_FIELD_IN_CDB, ASC_LBA_OUT_OF_RANGE};
    use crate::sg::SgList;
    use crate::Error;

    fn small() -> TargetConfig {
        TargetConfig::new().with_capacity_blocks(2048).with_sector_size(512)
    }

    fn run(exec: &Executor, cdb: Cdb, sg: SgList) -> Command {
        let mut cmd = Command::with_sg(cdb, sg);
        exec.execute(&mut cmd);
        cmd
    }

    #[test]
    fn test_write_then_read_0xab() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(true, 0, 4), SgList::chunked(&[0xAB; 2048], 2048));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 2048);

        let cmd = run(&exec, Cdb::rw10(false, 0, 4), SgList::zeroed(1, 2048));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().residual, 0);
        assert_eq!(cmd.sg.to_vec(), vec![0xAB; 2048]);
    }

    #[test]
    fn test_rw6_round_trip() {
        let exec = Executor::new(&small()).unwrap();
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let cmd = run(&exec, Cdb::rw6(true, 7, 2), SgList::chunked(&data, 300));
        assert!(cmd.result().is_good());

        let cmd = run(&exec, Cdb::rw6(false, 7, 2), SgList::zeroed(4, 256));
        assert_eq!(cmd.sg.to_vec(), data);
    }

    #[test]
    fn test_read_past_capacity_is_check_condition() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(false, 2047, 2), SgList::zeroed(1, 1024));
        let result = cmd.result();
        assert_eq!(result.status, ScsiStatus::CheckCondition);
        assert_eq!(result.host_status, HostStatus::Ok);
        assert_eq!(result.transferred, 0);
        assert_eq!(result.residual, 0);
        let sense = result.sense_record().unwrap();
        assert_eq!(sense.key, SenseKey::IllegalRequest);
        assert_eq!(sense.asc, ASC_LBA_OUT_OF_RANGE);
        assert_eq!(exec.stats().snapshot().check_conditions, 1);
    }

    #[test]
    fn test_write_past_capacity_leaves_store_untouched() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(true, 2046, 4), SgList::chunked(&[0xFF; 2048], 512));
        assert_eq!(cmd.result().status, ScsiStatus::CheckCondition);

        let cmd = run(&exec, Cdb::rw10(false, 2046, 2), SgList::zeroed(1, 1024));
        assert!(cmd.sg.to_vec().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bounds_do_not_overflow_u32() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(false, u32::MAX, u16::MAX), SgList::new());
        assert_eq!(cmd.result().status, ScsiStatus::CheckCondition);
    }

    #[test]
    fn test_last_block_is_addressable() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(true, 2047, 1), SgList::chunked(&[1; 512], 512));
        assert!(cmd.result().is_good());
    }

    #[test]
    fn test_short_sg_reports_residual() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::rw10(false, 0, 4), SgList::zeroed(1, 1500));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 1500);
        assert_eq!(cmd.result().residual, 548);
    }

    #[test]
    fn test_discard_writes() {
        let exec = Executor::new(&small().with_discard_writes(true)).unwrap();
        let cmd = run(&exec, Cdb::rw10(true, 0, 1), SgList::chunked(&[0x11; 512], 512));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 0);

        let cmd = run(&exec, Cdb::rw10(false, 0, 1), SgList::zeroed(1, 512));
        assert!(cmd.sg.to_vec().iter().all(|&b| b == 0));

        // Bounds still apply.
        let cmd = run(&exec, Cdb::rw10(true, 2048, 1), SgList::zeroed(1, 512));
        assert_eq!(cmd.result().status, ScsiStatus::CheckCondition);
    }

    #[test]
    fn test_discard_reads_toggle() {
        let exec = Executor::new(&small()).unwrap();
        run(&exec, Cdb::rw10(true, 3, 1), SgList::chunked(&[0x22; 512], 512));

        exec.set_discard_reads(true);
        let cmd = run(&exec, Cdb::rw10(false, 3, 1), SgList::zeroed(1, 512));
        assert!(cmd.result().is_good());
        assert!(cmd.sg.to_vec().iter().all(|&b| b == 0));

        exec.set_discard_reads(false);
        let cmd = run(&exec, Cdb::rw10(false, 3, 1), SgList::zeroed(1, 512));
        assert_eq!(cmd.sg.to_vec(), vec![0x22; 512]);
    }

    #[test]
    fn test_read_capacity_bytes() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::opcode_only(cdb::READ_CAPACITY, 10), SgList::zeroed(1, 8));
        assert_eq!(cmd.sg.to_vec(), vec![0, 0, 0x07, 0xff, 0, 0, 0x02, 0x00]);
        assert_eq!(cmd.result().transferred, 8);
    }

    #[test]
    fn test_inquiry_standard_data() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::inquiry(false, 0, 96), SgList::zeroed(1, 96));
        let data = cmd.sg.to_vec();
        assert_eq!(cmd.result().transferred, 57);
        assert_eq!(&data[..8], &[0, 0, 5, 0x22, 52, 0, 0, 0x0a]);
        assert_eq!(&data[8..16], b"Linux   ");
        assert_eq!(&data[16..32], b"RAM Drive       ");
        assert_eq!(&data[32..36], b"0.01");
        assert!(data[36..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_inquiry_truncated_to_segments() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::inquiry(false, 0, 36), SgList::zeroed(1, 36));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 36);
        assert_eq!(cmd.result().residual, 57 - 36);
    }

    #[test]
    fn test_fixed_replies_report_unfit_bytes_as_residual() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::opcode_only(cdb::READ_CAPACITY, 10), SgList::zeroed(1, 4));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 4);
        assert_eq!(cmd.result().residual, 4);
        assert_eq!(cmd.sg.to_vec(), vec![0, 0, 0x07, 0xff]);

        let cmd = run(&exec, Cdb::opcode_only(cdb::REPORT_LUNS, 12), SgList::zeroed(1, 8));
        assert_eq!(cmd.result().transferred, 8);
        assert_eq!(cmd.result().residual, 8);

        let cmd = run(&exec, Cdb::inquiry(true, 0, 255), SgList::zeroed(1, 2));
        assert_eq!(cmd.result().transferred, 2);
        assert_eq!(cmd.result().residual, 3);

        let cmd = run(&exec, Cdb::inquiry(false, 0, 96), SgList::zeroed(1, 96));
        assert_eq!(cmd.result().residual, 0);
    }

    #[test]
    fn test_mode_sense_has_no_residual() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::mode_sense(0x3f, 255), SgList::zeroed(1, 3));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 3);
        assert_eq!(cmd.result().residual, 0);
    }

    #[test]
    fn test_inquiry_vpd_pages() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::inquiry(true, 0, 255), SgList::zeroed(1, 255));
        assert!(cmd.result().is_good());
        assert_eq!(&cmd.sg.to_vec()[..5], &VPD_SUPPORTED_PAGES);

        let cmd = run(&exec, Cdb::inquiry(true, 0x80, 255), SgList::zeroed(1, 255));
        let sense = cmd.result().sense_record().unwrap();
        assert_eq!(sense.key, SenseKey::IllegalRequest);
        assert_eq!(sense.asc, ASC_INVALID_FIELD_IN_CDB);
        assert_eq!(sense.ascq, 0);
    }

    #[test]
    fn test_report_luns() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::opcode_only(cdb::REPORT_LUNS, 12), SgList::zeroed(1, 16));
        assert_eq!(cmd.sg.to_vec(), REPORT_LUNS_DATA.to_vec());
    }

    #[test]
    fn test_mode_sense_pages() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::mode_sense(0x08, 255), SgList::zeroed(1, 255));
        assert_eq!(cmd.result().transferred, 7);
        assert_eq!(&cmd.sg.to_vec()[..7], &MODE_SENSE_CACHING);

        let cmd = run(&exec, Cdb::mode_sense(0x3f, 4), SgList::zeroed(1, 255));
        assert_eq!(cmd.result().transferred, 4);
        assert_eq!(&cmd.sg.to_vec()[..4], &[6, 0, 0, 0]);

        let cmd = run(&exec, Cdb::mode_sense(0x1c, 255), SgList::zeroed(1, 255));
        assert!(cmd.result().is_good());
        assert_eq!(cmd.result().transferred, 4);
        assert_eq!(&cmd.sg.to_vec()[..4], &MODE_SENSE_HEADER);
    }

    #[test]
    fn test_test_unit_ready() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::opcode_only(cdb::TEST_UNIT_READY, 6), SgList::new());
        assert_eq!(cmd.result().word(), 0);
        assert_eq!(cmd.result().transferred, 0);
    }

    #[test]
    fn test_unknown_opcode_aborts() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::opcode_only(0x35, 10), SgList::new());
        assert_eq!(cmd.result().host_status, HostStatus::Abort);
        assert_eq!(cmd.result().word(), 5 << 16);
        assert_eq!(cmd.result().sense_record(), None);
        assert_eq!(exec.stats().snapshot().aborts, 1);
    }

    #[test]
    fn test_short_cdb_is_invalid_field() {
        let exec = Executor::new(&small()).unwrap();
        let cmd = run(&exec, Cdb::new(&[cdb::WRITE_10, 0, 0]).unwrap(), SgList::new());
        assert_eq!(cmd.result().sense_record(), Some(SenseRecord::invalid_field_in_cdb()));
    }

    #[test]
    fn test_released_store_is_bad_target() {
        let exec = Executor::new(&small()).unwrap();
        exec.release();
        assert!(exec.is_released());
        let cmd = run(&exec, Cdb::rw10(false, 0, 1), SgList::zeroed(1, 512));
        assert_eq!(cmd.result().host_status, HostStatus::BadTarget);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let alloc = Arc::new(CountingAllocator::failing_after(3));
        let err = Executor::with_allocator(&small(), alloc.clone()).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { pages_allocated: 3, .. }));
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Executor::new(&small().with_sector_size(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_result_reset_between_executions() {
        let exec = Executor::new(&small()).unwrap();
        let mut cmd = Command::with_sg(Cdb::rw10(false, 4096, 1), SgList::zeroed(1, 512));
        exec.execute(&mut cmd);
        assert_eq!(cmd.result().status, ScsiStatus::CheckCondition);
        let mut cmd = Command::with_sg(Cdb::rw10(false, 0, 1), cmd.sg);
        exec.execute(&mut cmd);
        assert!(cmd.result().is_good());
    }
}

//! Probe command: identify a freshly created unit.

use super::{Session, TargetArgs};
use crate::output::{OutputFormat, Report};
use anyhow::{bail, ensure};
use clap::Args;
use scsi_ram_core::cdb::{MODE_PAGE_ALL, READ_CAPACITY, REPORT_LUNS, TEST_UNIT_READY};
use scsi_ram_core::{Cdb, Command, SgList};
use serde::Serialize;

/// Arguments for probe command.
#[derive(Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

/// Serializable probe result.
#[derive(Debug, Serialize)]
struct ProbeOutput {
    dispatch: String,
    vendor: String,
    product: String,
    revision: String,
    capacity_blocks: u64,
    sector_size: u32,
    capacity_bytes: u64,
    luns: u32,
    caching_page: bool,
    vpd_pages: Vec<u8>,
}

impl Report for ProbeOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Dispatch", self.dispatch.clone()),
            ("Vendor", self.vendor.clone()),
            ("Product", self.product.clone()),
            ("Revision", self.revision.clone()),
            ("Blocks", self.capacity_blocks.to_string()),
            ("Sector size", self.sector_size.to_string()),
            ("Capacity", format!("{} bytes", self.capacity_bytes)),
            ("LUNs", self.luns.to_string()),
            ("Caching page", self.caching_page.to_string()),
            ("VPD pages", format!("{:02x?}", self.vpd_pages)),
        ]
    }
}

fn checked(session: &Session, cmd: Command, what: &str) -> anyhow::Result<Vec<u8>> {
    let cmd = session.run(cmd)?;
    let result = cmd.result();
    if !result.is_good() {
        bail!(
            "{what} failed: result {:#010x}, sense {:?}",
            result.word(),
            result.sense_record()
        );
    }
    let mut data = cmd.sg.to_vec();
    data.truncate(result.transferred);
    Ok(data)
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

/// Issue the identification commands against a new unit.
pub fn probe(args: &ProbeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = args.target.to_config()?;
    let session = Session::open(config)?;

    checked(&session, Command::new(Cdb::opcode_only(TEST_UNIT_READY, 6)), "TEST UNIT READY")?;

    let inquiry = checked(
        &session,
        Command::with_sg(Cdb::inquiry(false, 0, 96), SgList::zeroed(1, 96)),
        "INQUIRY",
    )?;
    ensure!(inquiry.len() >= 36, "short INQUIRY reply: {} bytes", inquiry.len());

    let vpd = checked(
        &session,
        Command::with_sg(Cdb::inquiry(true, 0, 255), SgList::zeroed(1, 255)),
        "INQUIRY VPD",
    )?;
    let vpd_pages = vpd.get(4..).map(<[u8]>::to_vec).unwrap_or_default();

    let capacity = checked(
        &session,
        Command::with_sg(Cdb::opcode_only(READ_CAPACITY, 10), SgList::zeroed(1, 8)),
        "READ CAPACITY",
    )?;
    ensure!(capacity.len() == 8, "short READ CAPACITY reply");
    let last_lba = u32::from_be_bytes([capacity[0], capacity[1], capacity[2], capacity[3]]);
    let sector_size = u32::from_be_bytes([capacity[4], capacity[5], capacity[6], capacity[7]]);

    let luns = checked(
        &session,
        Command::with_sg(Cdb::opcode_only(REPORT_LUNS, 12), SgList::zeroed(1, 16)),
        "REPORT LUNS",
    )?;
    ensure!(luns.len() >= 4, "short REPORT LUNS reply");
    let lun_list_len = u32::from_be_bytes([luns[0], luns[1], luns[2], luns[3]]);

    let mode = checked(
        &session,
        Command::with_sg(Cdb::mode_sense(MODE_PAGE_ALL, 192), SgList::zeroed(1, 192)),
        "MODE SENSE",
    )?;

    let capacity_blocks = u64::from(last_lba) + 1;
    let report = ProbeOutput {
        dispatch: format!("{:?}", session.unit().mode()).to_lowercase(),
        vendor: ascii(&inquiry[8..16]),
        product: ascii(&inquiry[16..32]),
        revision: ascii(&inquiry[32..36]),
        capacity_blocks,
        sector_size,
        capacity_bytes: capacity_blocks * u64::from(sector_size),
        luns: lun_list_len / 8,
        caching_page: mode.get(4) == Some(&0x08),
        vpd_pages,
    };
    session.close()?;
    report.print(format)
}

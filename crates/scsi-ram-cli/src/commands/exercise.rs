//! Exercise command: write a pattern, read it back, verify and time both.

use super::{Session, TargetArgs};
use crate::output::{OutputFormat, Report};
use anyhow::{bail, ensure};
use clap::Args;
use scsi_ram_core::{Cdb, Command, SgList, UnitStatsSnapshot};
use serde::Serialize;
use std::time::Instant;

/// Arguments for exercise command.
#[derive(Args)]
pub struct ExerciseArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Blocks per READ/WRITE command.
    #[arg(short, long, default_value = "8")]
    pub blocks: u16,

    /// Number of commands per pass (wraps around the device).
    #[arg(short = 'n', long, default_value = "1024")]
    pub ios: u32,

    /// Commands kept in flight at once.
    #[arg(short = 'd', long, default_value = "64")]
    pub depth: usize,

    /// Segment size used to split each command's buffer.
    #[arg(long, default_value = "4096")]
    pub segment: usize,

    /// Seed for the data pattern.
    #[arg(long, default_value = "12345")]
    pub seed: u64,
}

/// Serializable exercise result.
#[derive(Debug, Serialize)]
struct ExerciseOutput {
    dispatch: String,
    ios: u32,
    bytes_per_io: usize,
    write_mb_s: f64,
    read_mb_s: f64,
    mismatches: u32,
    stats: UnitStatsSnapshot,
}

impl Report for ExerciseOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Dispatch", self.dispatch.clone()),
            ("I/Os per pass", self.ios.to_string()),
            ("Bytes per I/O", self.bytes_per_io.to_string()),
            ("Write", format!("{:.1} MB/s", self.write_mb_s)),
            ("Read", format!("{:.1} MB/s", self.read_mb_s)),
            ("Mismatches", self.mismatches.to_string()),
            ("Commands", self.stats.commands.to_string()),
            ("Check conditions", self.stats.check_conditions.to_string()),
        ]
    }
}

fn fill(seed: u64, lba: u32, len: usize) -> Vec<u8> {
    let mut state = seed ^ u64::from(lba).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 33) as u8
        })
        .collect()
}

/// Run `count` commands built by `make`, keeping up to `depth` in flight, and
/// hand each completion to `check`.
fn pump(
    session: &Session,
    count: u32,
    depth: usize,
    mut make: impl FnMut(u32) -> Command,
    mut check: impl FnMut(Command) -> anyhow::Result<()>,
) -> anyhow::Result<f64> {
    let start = Instant::now();
    let mut submitted = 0u32;
    let mut completed = 0u32;
    while completed < count {
        while submitted < count && usize::try_from(submitted - completed)? < depth.max(1) {
            session.submit(make(submitted).tagged(u64::from(submitted)));
            submitted += 1;
        }
        check(session.next()?)?;
        completed += 1;
    }
    Ok(start.elapsed().as_secs_f64())
}

/// Write, read back and verify.
pub fn exercise(args: &ExerciseArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = args.target.to_config()?;
    ensure!(args.blocks > 0, "--blocks must be at least 1");
    ensure!(
        u32::from(args.blocks) <= config.capacity_blocks,
        "--blocks exceeds device capacity of {} blocks",
        config.capacity_blocks
    );

    let session = Session::open(config.clone())?;
    let bytes_per_io = usize::from(args.blocks) * config.sector_size as usize;
    let slots = config.capacity_blocks / u32::from(args.blocks);
    let lba_of = |io: u32| (io % slots) * u32::from(args.blocks);
    tracing::info!(ios = args.ios, bytes_per_io, slots, "Starting exercise");

    let write_secs = pump(
        &session,
        args.ios,
        args.depth,
        |io| {
            let lba = lba_of(io);
            let data = fill(args.seed, lba, bytes_per_io);
            Command::with_sg(Cdb::rw10(true, lba, args.blocks), SgList::chunked(&data, args.segment))
        },
        |cmd| {
            if !cmd.result().is_good() {
                bail!("WRITE {} failed: {:?}", cmd.tag(), cmd.result());
            }
            Ok(())
        },
    )?;

    // The pattern depends only on the LBA, so every pass over a slot matches.
    let mut mismatches = 0u32;
    let read_secs = pump(
        &session,
        args.ios,
        args.depth,
        |io| {
            let segments = bytes_per_io.div_ceil(args.segment.max(1));
            let sg = SgList::zeroed(segments, args.segment.max(1));
            Command::with_sg(Cdb::rw10(false, lba_of(io), args.blocks), sg)
        },
        |cmd| {
            if !cmd.result().is_good() {
                bail!("READ {} failed: {:?}", cmd.tag(), cmd.result());
            }
            let io = u32::try_from(cmd.tag())?;
            let expected = if config.discard_writes || config.discard_reads {
                vec![0; bytes_per_io]
            } else {
                fill(args.seed, lba_of(io), bytes_per_io)
            };
            if cmd.sg.to_vec()[..bytes_per_io] != expected[..] {
                mismatches += 1;
            }
            Ok(())
        },
    )?;

    #[allow(clippy::cast_precision_loss)]
    let mb = (bytes_per_io as f64 * f64::from(args.ios)) / 1e6;
    let report = ExerciseOutput {
        dispatch: format!("{:?}", session.unit().mode()).to_lowercase(),
        ios: args.ios,
        bytes_per_io,
        write_mb_s: mb / write_secs.max(f64::EPSILON),
        read_mb_s: mb / read_secs.max(f64::EPSILON),
        mismatches,
        stats: session.unit().stats(),
    };
    session.close()?;
    report.print(format)?;

    if report.mismatches > 0 {
        bail!("{} of {} reads returned unexpected data", report.mismatches, args.ios);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(queued: bool) -> ExerciseArgs {
        ExerciseArgs {
            target: TargetArgs {
                config: None,
                sector_size: Some(512),
                capacity_blocks: Some(256),
                queued,
                discard_writes: false,
                discard_reads: false,
            },
            blocks: 8,
            ios: 100,
            depth: 16,
            segment: 1000,
            seed: 1,
        }
    }

    #[test]
    fn test_fill_is_deterministic() {
        assert_eq!(fill(7, 3, 64), fill(7, 3, 64));
        assert_ne!(fill(7, 3, 64), fill(7, 4, 64));
    }

    #[test]
    fn test_exercise_inline_and_queued() {
        assert!(exercise(&args(false), OutputFormat::Raw).is_ok());
        assert!(exercise(&args(true), OutputFormat::Raw).is_ok());
    }

    #[test]
    fn test_exercise_depth_bounds() {
        for depth in [0, 1, 1000] {
            let mut a = args(true);
            a.depth = depth;
            assert!(exercise(&a, OutputFormat::Raw).is_ok(), "depth {depth}");
        }
    }

    #[test]
    fn test_pump_keeps_depth_in_flight() {
        let session = Session::open(args(true).target.to_config().unwrap()).unwrap();
        let mut seen = Vec::new();
        pump(
            &session,
            40,
            4,
            |_| Command::new(Cdb::opcode_only(scsi_ram_core::cdb::TEST_UNIT_READY, 6)),
            |cmd| {
                seen.push(cmd.tag());
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(seen, (0..40).collect::<Vec<u64>>());
        session.close().unwrap();
    }

    #[test]
    fn test_exercise_with_discard_writes() {
        let mut a = args(true);
        a.target.discard_writes = true;
        assert!(exercise(&a, OutputFormat::Raw).is_ok());
    }

    #[test]
    fn test_exercise_rejects_oversized_io() {
        let mut a = args(false);
        a.blocks = 512;
        assert!(exercise(&a, OutputFormat::Raw).is_err());
    }
}

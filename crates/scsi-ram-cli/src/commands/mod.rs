//! CLI command implementations.

mod exercise;
mod probe;

pub use exercise::{exercise, ExerciseArgs};
pub use probe::{probe, ProbeArgs};

use anyhow::{bail, Context};
use clap::Args;
use scsi_ram_core::{Command, CompletionSink, Host, LogicalUnit, TargetConfig};
use std::path::PathBuf;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a single completion before giving up.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Options describing the emulated unit.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// TOML file with target settings; flags below override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Logical block size in bytes.
    #[arg(long)]
    pub sector_size: Option<u32>,

    /// Number of logical blocks.
    #[arg(long)]
    pub capacity_blocks: Option<u32>,

    /// Run commands on a per-unit worker thread.
    #[arg(long)]
    pub queued: bool,

    /// Skip the data copy for writes.
    #[arg(long)]
    pub discard_writes: bool,

    /// Skip the data copy for reads.
    #[arg(long)]
    pub discard_reads: bool,
}

impl TargetArgs {
    /// Merge the config file (if any) with the command-line flags.
    pub fn to_config(&self) -> anyhow::Result<TargetConfig> {
        let mut config = match &self.config {
            Some(path) => TargetConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => TargetConfig::default(),
        };
        if let Some(sector_size) = self.sector_size {
            config.sector_size = sector_size;
        }
        if let Some(capacity_blocks) = self.capacity_blocks {
            config.capacity_blocks = capacity_blocks;
        }
        config.use_worker_thread |= self.queued;
        config.discard_writes |= self.discard_writes;
        config.discard_reads |= self.discard_reads;
        config.validate()?;
        Ok(config)
    }
}

/// Channel-backed completion sink.
struct ChannelSink {
    tx: Mutex<Sender<Command>>,
}

impl CompletionSink for ChannelSink {
    fn complete(&self, cmd: Command) {
        // The receiver only goes away when the session is dropped.
        let _ = self.tx.lock().send(cmd);
    }
}

/// A host with one unit at target 0, plus the receiving end of its sink.
pub struct Session {
    host: Host,
    unit: Arc<LogicalUnit>,
    done: Receiver<Command>,
}

impl Session {
    /// Build the host and create unit 0:0.
    pub fn open(config: TargetConfig) -> anyhow::Result<Self> {
        let (tx, done) = mpsc::channel();
        let sink = Arc::new(ChannelSink { tx: Mutex::new(tx) });
        let host = Host::new(config, sink).context("creating host")?;
        let unit = host.create_unit(0, 0).context("creating unit 0:0")?;
        Ok(Self { host, unit, done })
    }

    /// The unit under test.
    pub fn unit(&self) -> &LogicalUnit {
        &self.unit
    }

    /// Submit without waiting.
    pub fn submit(&self, cmd: Command) {
        self.host.submit(0, 0, cmd);
    }

    /// Wait for the next completion.
    pub fn next(&self) -> anyhow::Result<Command> {
        match self.done.recv_timeout(COMPLETION_TIMEOUT) {
            Ok(cmd) => Ok(cmd),
            Err(e) => bail!("no completion within {COMPLETION_TIMEOUT:?}: {e}"),
        }
    }

    /// Submit and wait for that command to complete.
    pub fn run(&self, cmd: Command) -> anyhow::Result<Command> {
        self.submit(cmd);
        self.next()
    }

    /// Tear down the unit and host.
    pub fn close(self) -> anyhow::Result<()> {
        self.host.destroy_unit(0)?;
        Ok(())
    }
}

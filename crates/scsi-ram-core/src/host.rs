//! Emulated adapter owning a bounds-checked table of logical units.

use crate::command::{Command, HostStatus};
use crate::config::TargetConfig;
use crate::page::{HeapPageAllocator, PageAllocator};
use crate::unit::{CompletionSink, LogicalUnit, UnitId};
use crate::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Number of target ids a host exposes (0..16).
pub const MAX_TARGETS: u8 = 16;

/// One emulated host adapter.
pub struct Host {
    config: TargetConfig,
    units: RwLock<FxHashMap<u8, Arc<LogicalUnit>>>,
    sink: Arc<dyn CompletionSink>,
    allocator: Arc<dyn PageAllocator>,
}

impl Host {
    /// Create a host whose units use `config` and complete into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: TargetConfig, sink: Arc<dyn CompletionSink>) -> Result<Self> {
        Self::with_allocator(config, sink, Arc::new(HeapPageAllocator))
    }

    /// Like [`Host::new`], drawing store pages from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn with_allocator(
        config: TargetConfig,
        sink: Arc<dyn CompletionSink>,
        allocator: Arc<dyn PageAllocator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, units: RwLock::new(FxHashMap::default()), sink, allocator })
    }

    /// Configuration applied to new units.
    #[must_use]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Create the unit at `target`/`lun` and register it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTarget`] if `target >= MAX_TARGETS`
    /// - [`Error::UnsupportedLun`] if `lun != 0`
    /// - [`Error::UnitExists`] if the target already has a unit
    /// - any error from [`LogicalUnit::new`]; the table is left unchanged
    pub fn create_unit(&self, target: u8, lun: u64) -> Result<Arc<LogicalUnit>> {
        if target >= MAX_TARGETS {
            return Err(Error::InvalidTarget { target, max: MAX_TARGETS - 1 });
        }
        if lun != 0 {
            return Err(Error::UnsupportedLun { target, lun });
        }

        if self.units.read().contains_key(&target) {
            return Err(Error::UnitExists(target));
        }
        // Built outside the table lock; store allocation can be slow.
        let unit = Arc::new(LogicalUnit::with_allocator(
            UnitId::new(target, lun),
            &self.config,
            Arc::clone(&self.sink),
            Arc::clone(&self.allocator),
        )?);

        let mut units = self.units.write();
        if units.contains_key(&target) {
            drop(units);
            unit.shutdown();
            return Err(Error::UnitExists(target));
        }
        units.insert(target, Arc::clone(&unit));
        Ok(unit)
    }

    /// Unregister the unit at `target` and shut it down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchUnit`] if nothing is registered there.
    pub fn destroy_unit(&self, target: u8) -> Result<()> {
        let unit = self.units.write().remove(&target).ok_or(Error::NoSuchUnit(target))?;
        unit.shutdown();
        Ok(())
    }

    /// The unit registered at `target`.
    #[must_use]
    pub fn unit(&self, target: u8) -> Option<Arc<LogicalUnit>> {
        self.units.read().get(&target).cloned()
    }

    /// Registered target ids, ascending.
    #[must_use]
    pub fn targets(&self) -> Vec<u8> {
        let mut targets: Vec<u8> = self.units.read().keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    /// Route a command to the addressed unit. Commands for an empty slot or a
    /// nonzero LUN complete at once with BAD TARGET.
    pub fn submit(&self, target: u8, lun: u64, mut cmd: Command) {
        let unit = if lun == 0 { self.unit(target) } else { None };
        match unit {
            Some(unit) => unit.submit(cmd),
            None => {
                tracing::debug!(target_id = target, lun, "Command for missing unit");
                cmd.set_host_status(HostStatus::BadTarget);
                self.sink.complete(cmd);
            }
        }
    }

    /// Host reset from the bus layer's error handler. There is no in-flight
    /// state to discard, so this always succeeds.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn reset(&self) -> Result<()> {
        tracing::info!(units = self.units.read().len(), "Host reset");
        Ok(())
    }

    /// Shut down and unregister every unit.
    pub fn shutdown(&self) {
        let units: Vec<Arc<LogicalUnit>> = self.units.write().drain().map(|(_, u)| u).collect();
        for unit in units {
            unit.shutdown();
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("targets", &self.targets())
            .finish_non_exhaustive()
    }
}

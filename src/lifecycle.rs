use anyhow::Context as _;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, warn};

use crate::{definition::Role, errors::FactoryErrorKind, factory::Factory};

/// Instance with a start/stop lifecycle, driven by the container's lifecycle processor.
pub trait Lifecycle: Send + Sync {
    /// # Errors
    /// An error fails the container start
    fn start(&self) -> Result<(), anyhow::Error>;

    /// # Errors
    /// Errors are logged and don't stop other instances from stopping
    fn stop(&self) -> Result<(), anyhow::Error>;

    fn is_running(&self) -> bool;

    /// Instances start in ascending and stop in descending phase order
    fn phase(&self) -> i32 {
        0
    }

    /// Whether the instance starts on container refresh, not only on explicit start
    fn auto_startup(&self) -> bool {
        false
    }
}

/// Strategy for starting and stopping lifecycle instances of a factory.
pub trait LifecycleProcessor: Send + Sync {
    /// # Errors
    /// Returns an error if an instance failed to start
    fn start(&self, factory: &Factory) -> Result<(), anyhow::Error>;

    /// # Errors
    /// Returns an error if lifecycle instances can't be resolved
    fn stop(&self, factory: &Factory) -> Result<(), anyhow::Error>;

    /// Called at the end of a refresh.
    ///
    /// # Errors
    /// Returns an error if an auto-startup instance failed to start
    fn on_refresh(&self, factory: &Factory) -> Result<(), anyhow::Error>;

    /// Called at the beginning of a close. Never fails
    fn on_close(&self, factory: &Factory);

    fn is_running(&self) -> bool;
}

type Instances = Vec<(String, Arc<dyn Lifecycle>)>;

#[derive(Default)]
pub struct DefaultLifecycleProcessor {
    running: AtomicBool,
    started: Mutex<Instances>,
}

impl DefaultLifecycleProcessor {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifecycle instances sorted by ascending phase, keeping registration order within a phase
    fn instances(factory: &Factory) -> Result<Instances, FactoryErrorKind> {
        let mut instances = Vec::new();
        for name in factory.names_by_role(Role::Lifecycle) {
            if let Some(lifecycle) = factory.lifecycle(&name)? {
                instances.push((name, lifecycle));
            }
        }
        instances.sort_by_key(|(_, lifecycle)| lifecycle.phase());
        Ok(instances)
    }

    fn start_instances(&self, factory: &Factory, auto_startup_only: bool) -> Result<(), anyhow::Error> {
        let mut started = Vec::new();
        for (name, lifecycle) in Self::instances(factory)? {
            if !lifecycle.is_running() {
                if auto_startup_only && !lifecycle.auto_startup() {
                    continue;
                }
                debug!(name, phase = lifecycle.phase(), "Starting");
                lifecycle.start().with_context(|| format!("Failed to start '{name}'"))?;
            }
            started.push((name, lifecycle));
        }

        *self.started.lock() = started;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_instances(instances: &Instances) {
        for (name, lifecycle) in instances.iter().rev() {
            if !lifecycle.is_running() {
                continue;
            }
            debug!(name, phase = lifecycle.phase(), "Stopping");
            if let Err(err) = lifecycle.stop() {
                warn!(name, %err, "Failed to stop");
            }
        }
    }
}

impl LifecycleProcessor for DefaultLifecycleProcessor {
    fn start(&self, factory: &Factory) -> Result<(), anyhow::Error> {
        self.start_instances(factory, false)
    }

    fn stop(&self, factory: &Factory) -> Result<(), anyhow::Error> {
        let instances = Self::instances(factory)?;
        Self::stop_instances(&instances);
        self.started.lock().clear();
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn on_refresh(&self, factory: &Factory) -> Result<(), anyhow::Error> {
        self.start_instances(factory, true)
    }

    fn on_close(&self, factory: &Factory) {
        if let Err(err) = self.stop(factory) {
            warn!(%err, "Failed to stop lifecycle instances on close");
            let instances = core::mem::take(&mut *self.started.lock());
            Self::stop_instances(&instances);
            self.running.store(false, Ordering::Release);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.started.lock().iter().all(|(_, lifecycle)| lifecycle.is_running())
    }
}

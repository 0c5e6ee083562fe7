//! Monitoring cycle scheduler: fixed-interval, batched probing of every site.

mod engine;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MonitorConfig;
use crate::detect::IncidentDetector;
use crate::monitor::EntitySource;
use crate::probes::Prober;
use crate::storage::Pool;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("a monitoring cycle is already in progress")]
    AlreadyRunning,
}

/// Cycle tuning taken from `[monitor]`.
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub probe_timeout: Duration,
}

impl From<&MonitorConfig> for CycleSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            interval: cfg.interval(),
            batch_size: cfg.batch_size.max(1),
            probe_timeout: cfg.probe_timeout(),
        }
    }
}

/// Summary of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub branches: usize,
    pub atms: usize,
    pub targets: usize,
    pub probes_failed: usize,
    pub pings_written: usize,
    pub write_failures: usize,
    pub detection_failures: usize,
    pub incidents_opened: usize,
    pub incidents_resolved: usize,
    pub tickets_created: usize,
    /// Entity-selection errors, one per failed list.
    pub selection_errors: Vec<String>,
}

struct Inner {
    pool: Pool,
    sources: Arc<dyn EntitySource>,
    prober: Arc<dyn Prober>,
    detector: IncidentDetector,
    settings: CycleSettings,
    /// Held for the whole of a cycle so that cycles never overlap.
    cycle_lock: tokio::sync::Mutex<()>,
    runner: Mutex<Option<Runner>>,
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-lived scheduler owned by application startup.
#[derive(Clone)]
pub struct MonitorScheduler {
    inner: Arc<Inner>,
}

impl MonitorScheduler {
    pub fn new(
        pool: Pool,
        sources: Arc<dyn EntitySource>,
        prober: Arc<dyn Prober>,
        detector: IncidentDetector,
        settings: CycleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                sources,
                prober,
                detector,
                settings,
                cycle_lock: tokio::sync::Mutex::new(()),
                runner: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> CycleSettings {
        self.inner.settings
    }

    /// Start the timer loop: one cycle now, then one per interval.
    /// Returns `false` (and does nothing) if already running.
    pub fn start(&self) -> bool {
        let mut runner = self.inner.runner.lock().unwrap_or_else(|p| p.into_inner());
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine::run_loop(self.clone(), cancel.clone()));
        *runner = Some(Runner { cancel, handle });
        info!(interval = ?self.inner.settings.interval, "Monitoring scheduler started");
        true
    }

    /// Cancel the pending timer. A cycle already in flight runs to completion;
    /// no further cycles start. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let taken = self
            .inner
            .runner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match taken {
            Some(runner) => {
                runner.cancel.cancel();
                info!("Monitoring scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .runner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one cycle now. Refused while another cycle is in progress.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _guard = self
            .inner
            .cycle_lock
            .try_lock()
            .map_err(|_| CycleError::AlreadyRunning)?;
        Ok(engine::execute_cycle(&self.inner).await)
    }
}

//! branchwatch -- network health monitoring and incident detection for
//! bank branches and ATMs.
//!
//! This crate provides the batch probe scheduler, the ping log, sustained-outage
//! detection with ticket escalation, and the health/performance read side.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod monitor;
pub mod probes;
pub mod scheduler;
pub mod storage;
pub mod ticketing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::analysis::HealthAggregator;
use crate::config::BranchwatchConfig;
use crate::detect::{IncidentDetector, IncidentEscalator, IncidentManager};
use crate::monitor::SqliteEntitySource;
use crate::probes::{IcmpProber, Prober};
use crate::scheduler::MonitorScheduler;
use crate::storage::Pool;
use crate::ticketing::SqliteTicketing;

/// Every long-lived component, wired together from one configuration.
#[derive(Clone)]
pub struct Engine {
    pub pool: Pool,
    pub sites: SqliteEntitySource,
    pub ticketing: SqliteTicketing,
    pub incidents: IncidentManager,
    pub scheduler: MonitorScheduler,
    pub aggregator: HealthAggregator,
}

impl Engine {
    /// Open the configured database and wire the system `ping` prober.
    pub fn build(config: &BranchwatchConfig) -> Result<Self> {
        info!(db_path = %config.storage.db_path, "Initializing database");
        let pool = storage::open_pool(&config.storage.db_path)
            .with_context(|| format!("Failed to open database {}", config.storage.db_path))?;
        let prober = Arc::new(IcmpProber::new(&config.probe));
        Ok(Self::with_prober(pool, config, prober))
    }

    /// Wire the engine on an existing pool with a caller-supplied prober.
    pub fn with_prober(pool: Pool, config: &BranchwatchConfig, prober: Arc<dyn Prober>) -> Self {
        let sites = SqliteEntitySource::new(pool.clone());
        let ticketing = SqliteTicketing::new(pool.clone(), &config.escalation);
        let incidents = IncidentManager::new(pool.clone());

        let escalator = config
            .escalation
            .enabled
            .then(|| IncidentEscalator::new(Arc::new(ticketing.clone()), incidents.clone()));
        let detector = IncidentDetector::new(pool.clone(), escalator);

        let sources = Arc::new(sites.clone());
        let scheduler = MonitorScheduler::new(
            pool.clone(),
            sources.clone(),
            prober,
            detector,
            (&config.monitor).into(),
        );
        let aggregator = HealthAggregator::new(pool.clone(), sources, config.health.clone());

        Self {
            pool,
            sites,
            ticketing,
            incidents,
            scheduler,
            aggregator,
        }
    }

    pub fn app_state(&self) -> api::state::AppState {
        api::state::AppState {
            scheduler: self.scheduler.clone(),
            aggregator: self.aggregator.clone(),
            incidents: self.incidents.clone(),
        }
    }
}

/// Start the branchwatch daemon: API server plus the monitoring scheduler.
pub async fn serve(config: BranchwatchConfig) -> Result<()> {
    let engine = Engine::build(&config)?;

    if config.monitor.autostart {
        engine.scheduler.start();
    } else {
        info!("Monitoring autostart disabled; start it via the API");
    }

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.api.bind))?;
    let app = api::router(engine.app_state());

    info!(%addr, "branchwatch listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.scheduler.stop();
    info!("branchwatch stopped");
    Ok(())
}

/// Completes on SIGINT (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

use super::{CycleError, CycleReport, Inner, MonitorScheduler};
use crate::detect::{DetectionOutcome, EscalationOutcome, Observation};
use crate::monitor::{AddressRole, MonitoredEntity};
use crate::storage::ping_log;
use chrono::Utc;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Main scheduler loop. The first tick fires immediately; later ticks that
/// fall behind a long cycle are delayed, never bunched up.
pub(super) async fn run_loop(scheduler: MonitorScheduler, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(scheduler.inner.settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match scheduler.run_cycle().await {
            Ok(report) => info!(
                targets = report.targets,
                written = report.pings_written,
                failed = report.probes_failed,
                opened = report.incidents_opened,
                resolved = report.incidents_resolved,
                tickets = report.tickets_created,
                duration_ms = report.duration_ms,
                "Monitoring cycle complete"
            ),
            Err(CycleError::AlreadyRunning) => {
                warn!("Skipping scheduled cycle: a manual cycle is still running")
            }
        }
    }

    info!("Scheduler engine exited");
}

/// Probe every monitored site once. Failures are logged and counted, never propagated.
pub(super) async fn execute_cycle(inner: &Inner) -> CycleReport {
    let started = Instant::now();
    let mut report = CycleReport {
        started_at: Some(Utc::now()),
        ..Default::default()
    };

    let branches = match inner.sources.active_branches().await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to list branches: {:#}", e);
            report.selection_errors.push(format!("branches: {e}"));
            Vec::new()
        }
    };
    report.branches = branches.len();
    probe_in_batches(inner, &branches, &mut report).await;

    let atms = match inner.sources.active_atms().await {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to list ATMs: {:#}", e);
            report.selection_errors.push(format!("atms: {e}"));
            Vec::new()
        }
    };
    report.atms = atms.len();
    probe_in_batches(inner, &atms, &mut report).await;

    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}

async fn probe_in_batches(inner: &Inner, entities: &[MonitoredEntity], report: &mut CycleReport) {
    for batch in entities.chunks(inner.settings.batch_size) {
        let checks = batch.iter().flat_map(|entity| {
            entity
                .targets()
                .into_iter()
                .map(move |(role, address)| check_target(inner, entity, role, address))
        });

        for result in join_all(checks).await {
            report.targets += 1;
            match result {
                TargetResult::ProbeFailed => report.probes_failed += 1,
                TargetResult::WriteFailed => report.write_failures += 1,
                TargetResult::Written(detection) => {
                    report.pings_written += 1;
                    match detection {
                        Some(DetectionOutcome::Created { escalation, .. }) => {
                            report.incidents_opened += 1;
                            if matches!(escalation, Some(EscalationOutcome::Created { .. })) {
                                report.tickets_created += 1;
                            }
                        }
                        Some(DetectionOutcome::Resolved { .. }) => report.incidents_resolved += 1,
                        Some(_) => {}
                        None => report.detection_failures += 1,
                    }
                }
            }
        }
    }
}

enum TargetResult {
    ProbeFailed,
    WriteFailed,
    /// `None` when detection itself failed.
    Written(Option<DetectionOutcome>),
}

/// Probe one address, persist the result, then run detection for that target.
async fn check_target(
    inner: &Inner,
    entity: &MonitoredEntity,
    role: AddressRole,
    address: &str,
) -> TargetResult {
    let timeout = inner.settings.probe_timeout;
    // Probers enforce `timeout` themselves; this only catches ones that hang.
    let guard = timeout + PROBE_GRACE;
    let label = entity.label();

    let outcome = match tokio::time::timeout(guard, inner.prober.probe(address, timeout)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(entity = %label, %role, %address, "Probe failed: {:#}", e);
            return TargetResult::ProbeFailed;
        }
        Err(_) => {
            warn!(entity = %label, %role, %address, ?guard, "Probe did not finish in time");
            return TargetResult::ProbeFailed;
        }
    };

    let ping = match ping_log::record_ping(
        &inner.pool,
        entity.entity_ref(),
        role,
        address,
        &outcome,
        Utc::now(),
    ) {
        Ok(p) => p,
        Err(e) => {
            error!(entity = %label, %role, "Failed to save ping result: {:#}", e);
            return TargetResult::WriteFailed;
        }
    };
    debug!(entity = %label, %role, status = %ping.status, rtt = ?ping.response_time_ms, "Ping recorded");

    let obs = Observation {
        entity: ping.entity,
        entity_label: label,
        address_role: role,
        status: ping.status,
    };
    match inner.detector.observe(&obs).await {
        Ok(detection) => TargetResult::Written(Some(detection)),
        Err(e) => {
            error!(entity = %obs.entity_label, %role, "Incident detection failed: {:#}", e);
            TargetResult::Written(None)
        }
    }
}

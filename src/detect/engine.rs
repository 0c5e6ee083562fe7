use crate::detect::incident::NewIncident;
use crate::detect::{
    classify_failure, failure_threshold, CreateOutcome, EscalationOutcome, IncidentEscalator,
    IncidentManager, IncidentMetrics, NetworkIncident, Severity,
};
use crate::monitor::{AddressRole, EntityRef, PingStatus};
use crate::storage::{ping_log, Pool};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// A freshly written observation for one target.
#[derive(Debug, Clone)]
pub struct Observation {
    pub entity: EntityRef,
    /// Human-readable site identity, e.g. "Branch Quay Street (BR-005)".
    pub entity_label: String,
    pub address_role: AddressRole,
    pub status: PingStatus,
}

/// The single decision taken for one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    /// ONLINE closed the target's active incident.
    Resolved { incident: NetworkIncident },
    /// ONLINE with nothing to close.
    Healthy,
    InsufficientHistory { needed: usize, have: usize },
    /// The last K observations are not all the same failing status.
    NotSustained { needed: usize },
    /// An active incident already covers this target.
    AlreadyOpen,
    Created {
        incident: NetworkIncident,
        escalation: Option<EscalationOutcome>,
    },
}

/// Debounces per-cycle probe results into incident open/resolve transitions.
pub struct IncidentDetector {
    pool: Pool,
    incidents: IncidentManager,
    escalator: Option<IncidentEscalator>,
}

impl IncidentDetector {
    pub fn new(pool: Pool, escalator: Option<IncidentEscalator>) -> Self {
        let incidents = IncidentManager::new(pool.clone());
        Self {
            pool,
            incidents,
            escalator,
        }
    }

    pub fn incidents(&self) -> &IncidentManager {
        &self.incidents
    }

    pub async fn observe(&self, obs: &Observation) -> Result<DetectionOutcome> {
        self.observe_at(obs, Utc::now()).await
    }

    /// Evaluate one observation. Must run after that observation's ping row is written.
    pub async fn observe_at(&self, obs: &Observation, now: DateTime<Utc>) -> Result<DetectionOutcome> {
        let Some((incident_type, severity)) = classify_failure(obs.status) else {
            return self.resolve(obs, now);
        };

        let needed = failure_threshold(obs.status);
        let history = ping_log::recent_pings(&self.pool, obs.entity, obs.address_role, needed)?;

        if history.len() < needed {
            debug!(entity = %obs.entity, role = %obs.address_role, needed, have = history.len(), "Not enough history yet");
            return Ok(DetectionOutcome::InsufficientHistory {
                needed,
                have: history.len(),
            });
        }
        if !history.iter().all(|p| p.status == obs.status) {
            return Ok(DetectionOutcome::NotSustained { needed });
        }
        if self.incidents.find_active(obs.entity, obs.address_role)?.is_some() {
            return Ok(DetectionOutcome::AlreadyOpen);
        }

        // history[0] is the newest row.
        let latest = &history[0];
        let new = NewIncident {
            entity: obs.entity,
            address_role: obs.address_role,
            incident_type,
            severity,
            description: format!(
                "{} {} address reported {} for {} consecutive checks",
                obs.entity_label, obs.address_role, obs.status, needed
            ),
            metrics: IncidentMetrics {
                consecutive_failures: needed,
                address_role: obs.address_role,
                last_status: latest.status,
                last_response_time_ms: latest.response_time_ms,
                last_packet_loss: latest.packet_loss,
            },
            created_at: now,
        };

        let incident = match self.incidents.create(&new)? {
            CreateOutcome::Created(incident) => incident,
            CreateOutcome::AlreadyOpen => {
                debug!(entity = %obs.entity, role = %obs.address_role, "Incident opened concurrently");
                return Ok(DetectionOutcome::AlreadyOpen);
            }
        };

        warn!(
            incident = incident.id,
            entity = %obs.entity_label,
            role = %obs.address_role,
            kind = %incident.incident_type,
            severity = %incident.severity,
            "Network incident opened"
        );

        let escalation = match (&self.escalator, incident.severity) {
            (Some(escalator), Severity::Critical) => {
                Some(escalator.escalate(&incident, &obs.entity_label).await)
            }
            _ => None,
        };

        Ok(DetectionOutcome::Created {
            incident,
            escalation,
        })
    }

    fn resolve(&self, obs: &Observation, now: DateTime<Utc>) -> Result<DetectionOutcome> {
        match self.incidents.resolve_active(obs.entity, obs.address_role, now)? {
            Some(incident) => {
                info!(
                    incident = incident.id,
                    entity = %obs.entity_label,
                    role = %obs.address_role,
                    "Network incident resolved"
                );
                Ok(DetectionOutcome::Resolved { incident })
            }
            None => Ok(DetectionOutcome::Healthy),
        }
    }
}

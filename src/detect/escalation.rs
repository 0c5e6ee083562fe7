//! Turns CRITICAL incidents into trouble tickets, once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::detect::{IncidentManager, NetworkIncident, Severity};
use crate::ticketing::{TicketCategory, TicketPriority, TicketSpec, TicketStatus, Ticketing};

/// What happened when an incident was handed to the escalator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    Created { ticket_id: i64, ticket_number: String },
    Skipped { reason: String },
    Failed { reason: String },
}

impl EscalationOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        EscalationOutcome::Skipped {
            reason: reason.into(),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        EscalationOutcome::Failed {
            reason: reason.into(),
        }
    }
}

pub struct IncidentEscalator {
    ticketing: Arc<dyn Ticketing>,
    incidents: IncidentManager,
}

impl IncidentEscalator {
    pub fn new(ticketing: Arc<dyn Ticketing>, incidents: IncidentManager) -> Self {
        Self {
            ticketing,
            incidents,
        }
    }

    /// File a ticket for `incident` and link it back. Never returns an error:
    /// every failure is logged and reported in the outcome.
    pub async fn escalate(&self, incident: &NetworkIncident, entity_label: &str) -> EscalationOutcome {
        if incident.severity != Severity::Critical {
            return EscalationOutcome::skipped(format!("severity {} is below CRITICAL", incident.severity));
        }
        if let Some(ticket_id) = incident.ticket_id {
            return EscalationOutcome::skipped(format!("incident already linked to ticket {ticket_id}"));
        }

        let service = match self.ticketing.find_network_service().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                error!(incident = incident.id, "No network service definition configured; escalation skipped");
                return EscalationOutcome::skipped("network service definition not configured");
            }
            Err(e) => {
                error!(incident = incident.id, "Network service lookup failed: {:#}", e);
                return EscalationOutcome::failed(format!("service lookup failed: {e}"));
            }
        };

        let requester = match self.ticketing.find_system_user().await {
            Ok(Some(u)) => u,
            Ok(None) => {
                error!(incident = incident.id, "No system user configured; escalation skipped");
                return EscalationOutcome::skipped("system user not configured");
            }
            Err(e) => {
                error!(incident = incident.id, "System user lookup failed: {:#}", e);
                return EscalationOutcome::failed(format!("system user lookup failed: {e}"));
            }
        };

        let spec = TicketSpec {
            ticket_number: ticket_number(Utc::now()),
            title: format!("Network outage: {entity_label} ({})", incident.address_role),
            description: format!(
                "Automatically raised by the network monitor.\n\n\
                 {}\n\n\
                 Entity: {} ({})\nAddress role: {}\nIncident: #{} {}\nDetected at: {}",
                incident.description,
                entity_label,
                incident.entity,
                incident.address_role,
                incident.id,
                incident.incident_type,
                incident.created_at.to_rfc3339(),
            ),
            category: TicketCategory::Incident,
            priority: TicketPriority::Critical,
            status: TicketStatus::Open,
            service_id: service.id,
            requester_id: requester.id,
        };

        let ticket = match self.ticketing.create_ticket(&spec).await {
            Ok(t) => t,
            Err(e) => {
                error!(incident = incident.id, "Ticket creation failed: {:#}", e);
                return EscalationOutcome::failed(format!("ticket creation failed: {e}"));
            }
        };

        if let Err(e) = self.incidents.attach_ticket(incident.id, ticket.id) {
            // The ticket exists; only the back-link is missing.
            warn!(incident = incident.id, ticket = %ticket.ticket_number, "Failed to link ticket: {:#}", e);
        }

        info!(
            incident = incident.id,
            ticket = %ticket.ticket_number,
            entity = %entity_label,
            "Escalated critical incident"
        );
        EscalationOutcome::Created {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number,
        }
    }
}

/// `NET-YYYYMMDD-XXXXXX`, the suffix taken from a random UUID.
pub fn ticket_number(at: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("NET-{}-{}", at.format("%Y%m%d"), suffix)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detect::incident::NewIncident;
    use crate::detect::{CreateOutcome, IncidentMetrics, IncidentType};
    use crate::monitor::{AddressRole, EntityRef, PingStatus};
    use crate::storage::test_pool;
    use crate::ticketing::{ServiceDefinition, SystemUser, TicketRef};
    use anyhow::Result;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// In-memory ticketing double that records every ticket request.
    #[derive(Default)]
    pub(crate) struct RecordingTicketing {
        pub missing_service: bool,
        pub missing_user: bool,
        pub fail_create: bool,
        pub created: Mutex<Vec<TicketSpec>>,
    }

    impl RecordingTicketing {
        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Ticketing for RecordingTicketing {
        async fn find_network_service(&self) -> Result<Option<ServiceDefinition>> {
            Ok((!self.missing_service).then(|| ServiceDefinition {
                id: 1,
                code: "NETWORK".to_string(),
                name: "Network".to_string(),
            }))
        }

        async fn find_system_user(&self) -> Result<Option<SystemUser>> {
            Ok((!self.missing_user).then(|| SystemUser {
                id: 1,
                username: "system".to_string(),
            }))
        }

        async fn create_ticket(&self, spec: &TicketSpec) -> Result<TicketRef> {
            if self.fail_create {
                anyhow::bail!("ticketing backend unavailable");
            }
            let mut created = self.created.lock().unwrap();
            created.push(spec.clone());
            Ok(TicketRef {
                id: created.len() as i64 + 100,
                ticket_number: spec.ticket_number.clone(),
            })
        }
    }

    fn open_incident(im: &IncidentManager, severity: Severity) -> NetworkIncident {
        let new = NewIncident {
            entity: EntityRef::branch(5),
            address_role: AddressRole::Primary,
            incident_type: IncidentType::CommunicationOffline,
            severity,
            description: "Branch Quay Street (BR-005) PRIMARY link OFFLINE for 3 consecutive checks".to_string(),
            metrics: IncidentMetrics {
                consecutive_failures: 3,
                address_role: AddressRole::Primary,
                last_status: PingStatus::Offline,
                last_response_time_ms: None,
                last_packet_loss: Some(100.0),
            },
            created_at: Utc::now(),
        };
        match im.create(&new).unwrap() {
            CreateOutcome::Created(i) => i,
            CreateOutcome::AlreadyOpen => panic!("unexpected duplicate"),
        }
    }

    #[tokio::test]
    async fn test_critical_incident_creates_linked_ticket() {
        let (_dir, pool) = test_pool();
        let im = IncidentManager::new(pool);
        let ticketing = Arc::new(RecordingTicketing::default());
        let escalator = IncidentEscalator::new(ticketing.clone(), im.clone());

        let incident = open_incident(&im, Severity::Critical);
        let outcome = escalator.escalate(&incident, "Branch Quay Street (BR-005)").await;

        let EscalationOutcome::Created { ticket_id, ticket_number } = outcome else {
            panic!("expected a ticket, got {outcome:?}");
        };
        assert!(ticket_number.starts_with("NET-"));
        assert_eq!(im.get(incident.id).unwrap().unwrap().ticket_id, Some(ticket_id));

        let created = ticketing.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].priority, TicketPriority::Critical);
        assert_eq!(created[0].category, TicketCategory::Incident);
        assert_eq!(created[0].status, TicketStatus::Open);
        assert!(created[0].description.contains("BR-005"));
        assert!(created[0].description.contains(&incident.description));
    }

    #[tokio::test]
    async fn test_non_critical_and_linked_incidents_are_skipped() {
        let (_dir, pool) = test_pool();
        let im = IncidentManager::new(pool);
        let ticketing = Arc::new(RecordingTicketing::default());
        let escalator = IncidentEscalator::new(ticketing.clone(), im.clone());

        let high = open_incident(&im, Severity::High);
        assert!(matches!(
            escalator.escalate(&high, "x").await,
            EscalationOutcome::Skipped { .. }
        ));

        let mut linked = high.clone();
        linked.severity = Severity::Critical;
        linked.ticket_id = Some(7);
        assert!(matches!(
            escalator.escalate(&linked, "x").await,
            EscalationOutcome::Skipped { .. }
        ));
        assert_eq!(ticketing.created_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_collaborators_skip_without_error() {
        let (_dir, pool) = test_pool();
        let im = IncidentManager::new(pool);
        let incident = open_incident(&im, Severity::Critical);

        let no_service = IncidentEscalator::new(
            Arc::new(RecordingTicketing {
                missing_service: true,
                ..Default::default()
            }),
            im.clone(),
        );
        assert_eq!(
            no_service.escalate(&incident, "x").await,
            EscalationOutcome::Skipped {
                reason: "network service definition not configured".to_string()
            }
        );

        let no_user = IncidentEscalator::new(
            Arc::new(RecordingTicketing {
                missing_user: true,
                ..Default::default()
            }),
            im.clone(),
        );
        assert!(matches!(
            no_user.escalate(&incident, "x").await,
            EscalationOutcome::Skipped { .. }
        ));

        let broken = IncidentEscalator::new(
            Arc::new(RecordingTicketing {
                fail_create: true,
                ..Default::default()
            }),
            im.clone(),
        );
        assert!(matches!(
            broken.escalate(&incident, "x").await,
            EscalationOutcome::Failed { .. }
        ));
        assert_eq!(im.get(incident.id).unwrap().unwrap().ticket_id, None);
    }

    #[test]
    fn test_ticket_number_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();
        let number = ticket_number(at);
        assert!(number.starts_with("NET-20261017-"));
        assert_eq!(number.len(), "NET-20261017-".len() + 6);
        let suffix = &number["NET-20261017-".len()..];
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }
}

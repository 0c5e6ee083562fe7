//! Sustained-outage detection, incident lifecycle, and escalation.

pub mod engine;
pub mod escalation;
pub mod incident;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::{AddressRole, EntityRef, PingStatus, UnknownVariant};

pub use self::engine::{DetectionOutcome, IncidentDetector, Observation};
pub use self::escalation::{EscalationOutcome, IncidentEscalator};
pub use self::incident::{CreateOutcome, IncidentManager};

/// Consecutive identical failures required when a status has no entry of its own.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Number of consecutive identical observations of `status` needed to open an incident.
pub fn failure_threshold(status: PingStatus) -> usize {
    match status {
        PingStatus::Offline => 3,
        PingStatus::Slow => 5,
        PingStatus::Error => 3,
        PingStatus::Online | PingStatus::Timeout => DEFAULT_FAILURE_THRESHOLD,
    }
}

/// Incident type and severity raised by a sustained failing status.
/// `None` for ONLINE, which never opens anything.
pub fn classify_failure(status: PingStatus) -> Option<(IncidentType, Severity)> {
    match status {
        PingStatus::Online => None,
        PingStatus::Offline => Some((IncidentType::CommunicationOffline, Severity::Critical)),
        PingStatus::Timeout => Some((IncidentType::CommunicationOffline, Severity::High)),
        PingStatus::Error => Some((IncidentType::NetworkCongestion, Severity::High)),
        PingStatus::Slow => Some((IncidentType::SlowConnection, Severity::Medium)),
    }
}

macro_rules! db_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    CommunicationOffline,
    SlowConnection,
    NetworkCongestion,
}

db_enum!(IncidentType, "incident type", {
    CommunicationOffline => "COMMUNICATION_OFFLINE",
    SlowConnection => "SLOW_CONNECTION",
    NetworkCongestion => "NETWORK_CONGESTION",
});

/// Severity levels for detected incidents, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

db_enum!(Severity, "severity", {
    Critical => "CRITICAL",
    High => "HIGH",
    Medium => "MEDIUM",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    InProgress,
    Resolved,
}

db_enum!(IncidentStatus, "incident status", {
    Open => "OPEN",
    InProgress => "IN_PROGRESS",
    Resolved => "RESOLVED",
});

impl IncidentStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::InProgress)
    }
}

/// Signal snapshot captured when an incident is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentMetrics {
    pub consecutive_failures: usize,
    pub address_role: AddressRole,
    pub last_status: PingStatus,
    pub last_response_time_ms: Option<f64>,
    pub last_packet_loss: Option<f64>,
}

/// A detected, sustained connectivity problem for one (entity, address role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkIncident {
    pub id: i64,
    pub entity: EntityRef,
    pub address_role: AddressRole,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub description: String,
    pub metrics: IncidentMetrics,
    pub ticket_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_table() {
        assert_eq!(failure_threshold(PingStatus::Offline), 3);
        assert_eq!(failure_threshold(PingStatus::Slow), 5);
        assert_eq!(failure_threshold(PingStatus::Error), 3);
        assert_eq!(failure_threshold(PingStatus::Timeout), DEFAULT_FAILURE_THRESHOLD);
    }

    #[test]
    fn test_failure_mapping() {
        assert_eq!(
            classify_failure(PingStatus::Offline),
            Some((IncidentType::CommunicationOffline, Severity::Critical))
        );
        assert_eq!(
            classify_failure(PingStatus::Error),
            Some((IncidentType::NetworkCongestion, Severity::High))
        );
        assert_eq!(
            classify_failure(PingStatus::Slow),
            Some((IncidentType::SlowConnection, Severity::Medium))
        );
        assert_eq!(classify_failure(PingStatus::Online), None);
    }

    #[test]
    fn test_enum_text_round_trip() {
        assert_eq!(IncidentStatus::InProgress.as_str(), "IN_PROGRESS");
        assert_eq!("in_progress".parse::<IncidentStatus>().unwrap(), IncidentStatus::InProgress);
        assert!("CLOSED".parse::<IncidentStatus>().is_err());
        assert!(IncidentStatus::Open.is_active());
        assert!(!IncidentStatus::Resolved.is_active());
    }
}

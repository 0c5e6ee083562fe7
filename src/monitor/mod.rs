//! Monitored sites, address roles, and probe statuses.

pub mod selector;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::selector::{EntitySource, NewAtm, NewBranch, SqliteEntitySource};

/// Returned when a stored or user-supplied value names no known variant.
#[derive(Debug, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Discriminator for the two kinds of monitored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Branch,
    Atm,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Branch => "BRANCH",
            EntityKind::Atm => "ATM",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRANCH" => Ok(EntityKind::Branch),
            "ATM" => Ok(EntityKind::Atm),
            _ => Err(UnknownVariant::new("entity type", s)),
        }
    }
}

/// Which of a site's network addresses a probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressRole {
    Primary,
    Backup,
}

impl AddressRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::Primary => "PRIMARY",
            AddressRole::Backup => "BACKUP",
        }
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(AddressRole::Primary),
            "BACKUP" => Ok(AddressRole::Backup),
            _ => Err(UnknownVariant::new("address role", s)),
        }
    }
}

/// Outcome class of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PingStatus {
    Online,
    Slow,
    Offline,
    Error,
    Timeout,
}

impl PingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingStatus::Online => "ONLINE",
            PingStatus::Slow => "SLOW",
            PingStatus::Offline => "OFFLINE",
            PingStatus::Error => "ERROR",
            PingStatus::Timeout => "TIMEOUT",
        }
    }

    /// ONLINE and SLOW probes got through and carry a meaningful latency.
    pub fn is_reachable(&self) -> bool {
        matches!(self, PingStatus::Online | PingStatus::Slow)
    }
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(PingStatus::Online),
            "SLOW" => Ok(PingStatus::Slow),
            "OFFLINE" => Ok(PingStatus::Offline),
            "ERROR" => Ok(PingStatus::Error),
            "TIMEOUT" => Ok(PingStatus::Timeout),
            _ => Err(UnknownVariant::new("ping status", s)),
        }
    }
}

/// Stable reference to one monitored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn branch(id: i64) -> Self {
        Self {
            kind: EntityKind::Branch,
            id,
        }
    }

    pub fn atm(id: i64) -> Self {
        Self {
            kind: EntityKind::Atm,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// A branch or ATM as the engine sees it. Owned by asset management; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub kind: EntityKind,
    pub id: i64,
    pub name: String,
    pub code: String,
    /// Parent branch of an ATM.
    pub branch_id: Option<i64>,
    pub primary_address: Option<String>,
    /// Only branches carry a backup link.
    pub backup_address: Option<String>,
    pub is_active: bool,
    pub monitoring_enabled: bool,
}

impl MonitoredEntity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Human-readable identity used in logs, incident descriptions and tickets.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            EntityKind::Branch => "Branch",
            EntityKind::Atm => "ATM",
        };
        format!("{} {} ({})", kind, self.name, self.code)
    }

    /// Addresses to probe, one per role. Blank addresses are skipped.
    pub fn targets(&self) -> Vec<(AddressRole, &str)> {
        let mut targets = Vec::with_capacity(2);
        if let Some(addr) = non_blank(&self.primary_address) {
            targets.push((AddressRole::Primary, addr));
        }
        if self.kind == EntityKind::Branch {
            if let Some(addr) = non_blank(&self.backup_address) {
                targets.push((AddressRole::Backup, addr));
            }
        }
        targets
    }
}

fn non_blank(addr: &Option<String>) -> Option<&str> {
    addr.as_deref().map(str::trim).filter(|a| !a.is_empty())
}

/// One stored probe outcome for one address of one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub id: i64,
    pub entity: EntityRef,
    pub address_role: AddressRole,
    pub address: String,
    pub status: PingStatus,
    pub response_time_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(primary: Option<&str>, backup: Option<&str>) -> MonitoredEntity {
        MonitoredEntity {
            kind: EntityKind::Branch,
            id: 7,
            name: "Harbour Road".to_string(),
            code: "BR-007".to_string(),
            branch_id: None,
            primary_address: primary.map(String::from),
            backup_address: backup.map(String::from),
            is_active: true,
            monitoring_enabled: true,
        }
    }

    #[test]
    fn test_branch_targets_both_roles() {
        let b = branch(Some("10.1.0.1"), Some("10.2.0.1"));
        assert_eq!(
            b.targets(),
            vec![
                (AddressRole::Primary, "10.1.0.1"),
                (AddressRole::Backup, "10.2.0.1")
            ]
        );
    }

    #[test]
    fn test_blank_addresses_are_skipped() {
        let b = branch(Some("  "), Some("10.2.0.1"));
        assert_eq!(b.targets(), vec![(AddressRole::Backup, "10.2.0.1")]);
        assert!(branch(None, None).targets().is_empty());
    }

    #[test]
    fn test_atm_ignores_backup() {
        let mut atm = branch(Some("10.9.0.5"), Some("10.9.0.6"));
        atm.kind = EntityKind::Atm;
        assert_eq!(atm.targets(), vec![(AddressRole::Primary, "10.9.0.5")]);
        assert_eq!(atm.label(), "ATM Harbour Road (BR-007)");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("offline".parse::<PingStatus>().unwrap(), PingStatus::Offline);
        assert_eq!("ATM".parse::<EntityKind>().unwrap(), EntityKind::Atm);
        assert!("LOST".parse::<PingStatus>().is_err());
        assert!(PingStatus::Slow.is_reachable());
        assert!(!PingStatus::Timeout.is_reachable());
    }
}

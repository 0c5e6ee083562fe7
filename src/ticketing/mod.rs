//! Ticketing collaborator: where escalated incidents become trouble tickets.

pub mod sqlite;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use self::sqlite::SqliteTicketing;

/// The service definition network tickets are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// Account that files tickets on behalf of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketCategory {
    Incident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::Incident => "INCIDENT",
        }
    }
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Critical => "CRITICAL",
        }
    }
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
        }
    }
}

/// Everything needed to open a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSpec {
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub service_id: i64,
    pub requester_id: i64,
}

/// Handle to a created ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: i64,
    pub ticket_number: String,
}

/// Trait for the ticketing system the escalator files into.
#[async_trait::async_trait]
pub trait Ticketing: Send + Sync {
    async fn find_network_service(&self) -> Result<Option<ServiceDefinition>>;

    async fn find_system_user(&self) -> Result<Option<SystemUser>>;

    async fn create_ticket(&self, spec: &TicketSpec) -> Result<TicketRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_codes_match_serialized_names() {
        for (json, code) in [
            (serde_json::to_value(TicketCategory::Incident).unwrap(), TicketCategory::Incident.as_str()),
            (serde_json::to_value(TicketPriority::Critical).unwrap(), TicketPriority::Critical.as_str()),
            (serde_json::to_value(TicketStatus::Open).unwrap(), TicketStatus::Open.as_str()),
        ] {
            assert_eq!(json, serde_json::Value::from(code));
        }
    }
}

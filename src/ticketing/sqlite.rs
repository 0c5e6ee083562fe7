use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{ServiceDefinition, SystemUser, TicketRef, TicketSpec, Ticketing};
use crate::config::EscalationConfig;
use crate::storage::Pool;

/// Ticketing backed by the local `service_definitions` / `users` / `tickets` tables.
#[derive(Clone)]
pub struct SqliteTicketing {
    pool: Pool,
    service_code: String,
    system_user: String,
}

impl SqliteTicketing {
    pub fn new(pool: Pool, config: &EscalationConfig) -> Self {
        Self {
            pool,
            service_code: config.service_code.clone(),
            system_user: config.system_user.clone(),
        }
    }

    /// Create the configured network service and system account if missing.
    pub fn bootstrap(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let services = conn.execute(
            "INSERT OR IGNORE INTO service_definitions (code, name) VALUES (?1, ?2)",
            params![self.service_code, "Network connectivity"],
        )?;
        let users = conn.execute(
            "INSERT OR IGNORE INTO users (username, display_name, is_system) VALUES (?1, ?2, 1)",
            params![self.system_user, "Network monitor"],
        )?;
        info!(
            service = %self.service_code,
            user = %self.system_user,
            created_service = services > 0,
            created_user = users > 0,
            "Ticketing bootstrap complete"
        );
        Ok(())
    }

    pub fn ticket_count(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?)
    }
}

#[async_trait::async_trait]
impl Ticketing for SqliteTicketing {
    async fn find_network_service(&self) -> Result<Option<ServiceDefinition>> {
        let conn = self.pool.get()?;
        let service = conn
            .query_row(
                "SELECT id, code, name FROM service_definitions WHERE code = ?1",
                [&self.service_code],
                |row| {
                    Ok(ServiceDefinition {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(service)
    }

    async fn find_system_user(&self) -> Result<Option<SystemUser>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT id, username FROM users WHERE username = ?1 AND is_system = 1",
                [&self.system_user],
                |row| {
                    Ok(SystemUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    async fn create_ticket(&self, spec: &TicketSpec) -> Result<TicketRef> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO tickets
                (ticket_number, title, description, category, priority, status, service_id, requester_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                spec.ticket_number,
                spec.title,
                spec.description,
                spec.category.as_str(),
                spec.priority.as_str(),
                spec.status.as_str(),
                spec.service_id,
                spec.requester_id,
            ],
        )
        .with_context(|| format!("Failed to create ticket {}", spec.ticket_number))?;

        Ok(TicketRef {
            id: conn.last_insert_rowid(),
            ticket_number: spec.ticket_number.clone(),
        })
    }
}

use crate::detect::{IncidentMetrics, IncidentStatus, IncidentType, NetworkIncident, Severity};
use crate::monitor::{AddressRole, EntityRef};
use crate::storage::{db_precision, parse_db_enum, parse_db_time, to_db_time, Pool};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};

const INCIDENT_COLUMNS: &str = "id, entity_type, entity_id, address_role, incident_type, severity,
    status, description, metrics_json, ticket_id, created_at, resolved_at";

/// Fields of an incident about to be opened.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub entity: EntityRef,
    pub address_role: AddressRole,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub metrics: IncidentMetrics,
    pub created_at: DateTime<Utc>,
}

/// Result of trying to open an incident.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(NetworkIncident),
    /// The active-incident index already holds a row for this target.
    AlreadyOpen,
}

/// Reads and writes `network_incidents`.
#[derive(Clone)]
pub struct IncidentManager {
    pool: Pool,
}

impl IncidentManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// The OPEN / IN_PROGRESS incident for a target, if any.
    pub fn find_active(&self, entity: EntityRef, role: AddressRole) -> Result<Option<NetworkIncident>> {
        let conn = self.pool.get()?;
        let incident = conn
            .query_row(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM network_incidents
                     WHERE entity_type = ?1 AND entity_id = ?2 AND address_role = ?3
                       AND status IN ('OPEN', 'IN_PROGRESS')"
                ),
                params![entity.kind.as_str(), entity.id, role.as_str()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    /// Insert a new OPEN incident. A unique-index violation means another
    /// writer got there first and is reported as `AlreadyOpen`.
    pub fn create(&self, new: &NewIncident) -> Result<CreateOutcome> {
        let conn = self.pool.get()?;
        let metrics_json = serde_json::to_string(&new.metrics)?;
        let created_at = db_precision(new.created_at);

        let inserted = conn.execute(
            "INSERT INTO network_incidents
                (entity_type, entity_id, address_role, incident_type, severity, status,
                 description, metrics_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.entity.kind.as_str(),
                new.entity.id,
                new.address_role.as_str(),
                new.incident_type.as_str(),
                new.severity.as_str(),
                IncidentStatus::Open.as_str(),
                new.description,
                metrics_json,
                to_db_time(created_at),
            ],
        );

        match inserted {
            Ok(_) => Ok(CreateOutcome::Created(NetworkIncident {
                id: conn.last_insert_rowid(),
                entity: new.entity,
                address_role: new.address_role,
                incident_type: new.incident_type,
                severity: new.severity,
                status: IncidentStatus::Open,
                description: new.description.clone(),
                metrics: new.metrics.clone(),
                ticket_id: None,
                created_at,
                resolved_at: None,
            })),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(CreateOutcome::AlreadyOpen)
            }
            Err(e) => Err(e).context("Failed to insert network incident"),
        }
    }

    /// Resolve the active incident for a target. Returns the resolved incident,
    /// or `None` when nothing was open.
    pub fn resolve_active(
        &self,
        entity: EntityRef,
        role: AddressRole,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<NetworkIncident>> {
        let Some(mut incident) = self.find_active(entity, role)? else {
            return Ok(None);
        };
        let resolved_at = db_precision(resolved_at);

        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE network_incidents SET status = ?1, resolved_at = ?2
             WHERE id = ?3 AND status IN ('OPEN', 'IN_PROGRESS')",
            params![
                IncidentStatus::Resolved.as_str(),
                to_db_time(resolved_at),
                incident.id
            ],
        )?;
        if changed == 0 {
            // Resolved concurrently between the read and the update.
            return Ok(None);
        }

        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(resolved_at);
        Ok(Some(incident))
    }

    /// Link a trouble ticket to an incident.
    pub fn attach_ticket(&self, incident_id: i64, ticket_id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE network_incidents SET ticket_id = ?1 WHERE id = ?2",
            params![ticket_id, incident_id],
        )?;
        if changed == 0 {
            anyhow::bail!("Incident {} not found", incident_id);
        }
        Ok(())
    }

    pub fn get(&self, incident_id: i64) -> Result<Option<NetworkIncident>> {
        let conn = self.pool.get()?;
        let incident = conn
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM network_incidents WHERE id = ?1"),
                [incident_id],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    /// Newest incidents first.
    pub fn list_recent(&self, limit: usize, active_only: bool) -> Result<Vec<NetworkIncident>> {
        let conn = self.pool.get()?;
        let filter = if active_only {
            "WHERE status IN ('OPEN', 'IN_PROGRESS')"
        } else {
            ""
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM network_incidents {filter}
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], incident_from_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    /// All incidents that were active at `as_of`: created by then and not yet
    /// resolved by then.
    pub fn active_at(&self, as_of: DateTime<Utc>) -> Result<Vec<NetworkIncident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM network_incidents
             WHERE created_at <= ?1
               AND (status IN ('OPEN', 'IN_PROGRESS') OR resolved_at > ?1)
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([to_db_time(as_of)], incident_from_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    /// Incidents resolved within `(since, until]`.
    pub fn resolved_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<NetworkIncident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM network_incidents
             WHERE status = 'RESOLVED' AND resolved_at > ?1 AND resolved_at <= ?2
             ORDER BY resolved_at DESC"
        ))?;
        let rows = stmt.query_map(params![to_db_time(since), to_db_time(until)], incident_from_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }
}

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<NetworkIncident> {
    let kind: String = row.get(1)?;
    let role: String = row.get(3)?;
    let incident_type: String = row.get(4)?;
    let severity: String = row.get(5)?;
    let status: String = row.get(6)?;
    let metrics_json: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    let resolved_at: Option<String> = row.get(11)?;

    let metrics: IncidentMetrics = serde_json::from_str(&metrics_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(NetworkIncident {
        id: row.get(0)?,
        entity: EntityRef {
            kind: parse_db_enum(1, &kind)?,
            id: row.get(2)?,
        },
        address_role: parse_db_enum(3, &role)?,
        incident_type: parse_db_enum(4, &incident_type)?,
        severity: parse_db_enum(5, &severity)?,
        status: parse_db_enum(6, &status)?,
        description: row.get(7)?,
        metrics,
        ticket_id: row.get(9)?,
        created_at: parse_db_time(10, &created_at)?,
        resolved_at: resolved_at.as_deref().map(|s| parse_db_time(11, s)).transpose()?,
    })
}

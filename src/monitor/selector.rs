//! Entity selection: which branches and ATMs get probed this cycle.

use anyhow::{Context, Result};
use rusqlite::{params, Row};

use super::{EntityKind, MonitoredEntity};
use crate::storage::Pool;

/// Source of monitored sites. Implementations return only active,
/// monitoring-enabled sites with at least one usable address.
#[async_trait::async_trait]
pub trait EntitySource: Send + Sync {
    async fn active_branches(&self) -> Result<Vec<MonitoredEntity>>;

    async fn active_atms(&self) -> Result<Vec<MonitoredEntity>>;

    /// Branches first, then ATMs.
    async fn all_monitored(&self) -> Result<Vec<MonitoredEntity>> {
        let mut all = self.active_branches().await?;
        all.extend(self.active_atms().await?);
        Ok(all)
    }
}

/// Reads sites from the local `branches` / `atms` tables.
#[derive(Clone)]
pub struct SqliteEntitySource {
    pool: Pool,
}

/// Fields needed to register a branch.
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub name: String,
    pub code: String,
    pub primary_address: Option<String>,
    pub backup_address: Option<String>,
}

/// Fields needed to register an ATM.
#[derive(Debug, Clone)]
pub struct NewAtm {
    pub name: String,
    pub code: String,
    pub branch_id: Option<i64>,
    pub address: Option<String>,
}

const BRANCH_COLUMNS: &str = "id, name, code, primary_address, backup_address, is_active, monitoring_enabled";
const ATM_COLUMNS: &str = "id, branch_id, name, code, address, is_active, monitoring_enabled";

impl SqliteEntitySource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn add_branch(&self, branch: &NewBranch) -> Result<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO branches (name, code, primary_address, backup_address) VALUES (?1, ?2, ?3, ?4)",
            params![branch.name, branch.code, branch.primary_address, branch.backup_address],
        )
        .with_context(|| format!("Failed to insert branch '{}'", branch.code))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_atm(&self, atm: &NewAtm) -> Result<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO atms (branch_id, name, code, address) VALUES (?1, ?2, ?3, ?4)",
            params![atm.branch_id, atm.name, atm.code, atm.address],
        )
        .with_context(|| format!("Failed to insert ATM '{}'", atm.code))?;
        Ok(conn.last_insert_rowid())
    }

    /// Toggle monitoring for one site without touching its active flag.
    pub fn set_monitoring(&self, kind: EntityKind, id: i64, enabled: bool) -> Result<()> {
        let table = table_for(kind);
        let conn = self.pool.get()?;
        let changed = conn.execute(
            &format!("UPDATE {table} SET monitoring_enabled = ?1 WHERE id = ?2"),
            params![enabled, id],
        )?;
        if changed == 0 {
            anyhow::bail!("{} {} not found", kind, id);
        }
        Ok(())
    }

    /// Every registered site, including inactive and unmonitored ones.
    pub fn list_all(&self) -> Result<Vec<MonitoredEntity>> {
        let mut all = self.query_branches(false)?;
        all.extend(self.query_atms(false)?);
        Ok(all)
    }

    fn query_branches(&self, monitored_only: bool) -> Result<Vec<MonitoredEntity>> {
        let conn = self.pool.get()?;
        let filter = if monitored_only {
            "WHERE is_active = 1 AND monitoring_enabled = 1
               AND (TRIM(COALESCE(primary_address, '')) != '' OR TRIM(COALESCE(backup_address, '')) != '')"
        } else {
            ""
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches {filter} ORDER BY id"
        ))?;
        let rows = stmt.query_map([], branch_from_row)?;
        let mut branches = Vec::new();
        for r in rows {
            branches.push(r?);
        }
        Ok(branches)
    }

    fn query_atms(&self, monitored_only: bool) -> Result<Vec<MonitoredEntity>> {
        let conn = self.pool.get()?;
        let filter = if monitored_only {
            "WHERE is_active = 1 AND monitoring_enabled = 1 AND TRIM(COALESCE(address, '')) != ''"
        } else {
            ""
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATM_COLUMNS} FROM atms {filter} ORDER BY id"
        ))?;
        let rows = stmt.query_map([], atm_from_row)?;
        let mut atms = Vec::new();
        for r in rows {
            atms.push(r?);
        }
        Ok(atms)
    }
}

#[async_trait::async_trait]
impl EntitySource for SqliteEntitySource {
    async fn active_branches(&self) -> Result<Vec<MonitoredEntity>> {
        self.query_branches(true)
    }

    async fn active_atms(&self) -> Result<Vec<MonitoredEntity>> {
        self.query_atms(true)
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Branch => "branches",
        EntityKind::Atm => "atms",
    }
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredEntity> {
    Ok(MonitoredEntity {
        kind: EntityKind::Branch,
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        branch_id: None,
        primary_address: row.get(3)?,
        backup_address: row.get(4)?,
        is_active: row.get(5)?,
        monitoring_enabled: row.get(6)?,
    })
}

fn atm_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredEntity> {
    Ok(MonitoredEntity {
        kind: EntityKind::Atm,
        id: row.get(0)?,
        branch_id: row.get(1)?,
        name: row.get(2)?,
        code: row.get(3)?,
        primary_address: row.get(4)?,
        backup_address: None,
        is_active: row.get(5)?,
        monitoring_enabled: row.get(6)?,
    })
}

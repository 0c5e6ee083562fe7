//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS branches (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            primary_address TEXT,
            backup_address TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            monitoring_enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS atms (
            id INTEGER PRIMARY KEY,
            branch_id INTEGER REFERENCES branches(id),
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            address TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            monitoring_enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ping_results (
            id INTEGER PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            address_role TEXT NOT NULL,
            address TEXT NOT NULL,
            status TEXT NOT NULL,
            response_time_ms REAL,
            packet_loss REAL,
            checked_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS network_incidents (
            id INTEGER PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            address_role TEXT NOT NULL,
            incident_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            description TEXT NOT NULL,
            metrics_json TEXT NOT NULL,
            ticket_id INTEGER,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE TABLE IF NOT EXISTS service_definitions (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            is_system INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY,
            ticket_number TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            service_id INTEGER NOT NULL REFERENCES service_definitions(id),
            requester_id INTEGER NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_ping_results_target
            ON ping_results(entity_type, entity_id, address_role, checked_at);
        CREATE INDEX IF NOT EXISTS idx_ping_results_checked ON ping_results(checked_at);
        CREATE INDEX IF NOT EXISTS idx_network_incidents_created ON network_incidents(created_at);
        CREATE INDEX IF NOT EXISTS idx_atms_branch ON atms(branch_id);

        -- One active incident per (entity, address role).
        CREATE UNIQUE INDEX IF NOT EXISTS idx_network_incidents_active
            ON network_incidents(entity_type, entity_id, address_role)
            WHERE status IN ('OPEN', 'IN_PROGRESS');",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ping_results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM network_incidents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_active_incident_index_rejects_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let insert = "INSERT INTO network_incidents
            (entity_type, entity_id, address_role, incident_type, severity, status,
             description, metrics_json, created_at)
            VALUES ('BRANCH', 1, 'PRIMARY', 'COMMUNICATION_OFFLINE', 'CRITICAL', ?1,
                    'down', '{}', '2026-01-01T00:00:00.000Z')";

        conn.execute(insert, ["OPEN"]).unwrap();
        assert!(conn.execute(insert, ["IN_PROGRESS"]).is_err());

        // Resolved rows are outside the partial index.
        conn.execute(insert, ["RESOLVED"]).unwrap();
        conn.execute(insert, ["RESOLVED"]).unwrap();
    }
}

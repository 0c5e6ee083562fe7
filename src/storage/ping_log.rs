//! Append-only log of probe outcomes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};

use super::{db_precision, parse_db_enum, parse_db_time, to_db_time, Pool};
use crate::monitor::{AddressRole, EntityKind, EntityRef, PingResult, PingStatus};
use crate::probes::ProbeOutcome;

const PING_COLUMNS: &str = "id, entity_type, entity_id, address_role, address, status,
    response_time_ms, packet_loss, checked_at";

/// Record one probe outcome. Rows are never updated or deleted here.
pub fn record_ping(
    pool: &Pool,
    entity: EntityRef,
    role: AddressRole,
    address: &str,
    outcome: &ProbeOutcome,
    checked_at: DateTime<Utc>,
) -> Result<PingResult> {
    let checked_at = db_precision(checked_at);
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO ping_results
            (entity_type, entity_id, address_role, address, status,
             response_time_ms, packet_loss, checked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entity.kind.as_str(),
            entity.id,
            role.as_str(),
            address,
            outcome.status.as_str(),
            outcome.response_time_ms,
            outcome.packet_loss,
            to_db_time(checked_at),
        ],
    )
    .with_context(|| format!("Failed to record ping for {entity}/{role}"))?;

    Ok(PingResult {
        id: conn.last_insert_rowid(),
        entity,
        address_role: role,
        address: address.to_string(),
        status: outcome.status,
        response_time_ms: outcome.response_time_ms,
        packet_loss: outcome.packet_loss,
        checked_at,
    })
}

/// The latest `limit` pings for one target, newest first.
pub fn recent_pings(
    pool: &Pool,
    entity: EntityRef,
    role: AddressRole,
    limit: usize,
) -> Result<Vec<PingResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {PING_COLUMNS} FROM ping_results
         WHERE entity_type = ?1 AND entity_id = ?2 AND address_role = ?3
         ORDER BY checked_at DESC, id DESC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(
        params![entity.kind.as_str(), entity.id, role.as_str(), limit as i64],
        ping_from_row,
    )?;

    let mut pings = Vec::new();
    for r in rows {
        pings.push(r?);
    }
    Ok(pings)
}

/// Most recent ping per (entity, address role) taken at or before `as_of`.
pub fn latest_per_target(pool: &Pool, as_of: DateTime<Utc>) -> Result<Vec<PingResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {PING_COLUMNS} FROM (
            SELECT *, ROW_NUMBER() OVER (
                PARTITION BY entity_type, entity_id, address_role
                ORDER BY checked_at DESC, id DESC
            ) AS rn
            FROM ping_results
            WHERE checked_at <= ?1
         )
         WHERE rn = 1
         ORDER BY entity_type, entity_id, address_role"
    ))?;
    let rows = stmt.query_map(params![to_db_time(as_of)], ping_from_row)?;

    let mut pings = Vec::new();
    for r in rows {
        pings.push(r?);
    }
    Ok(pings)
}

/// Optional narrowing of a ping range query.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingFilter {
    pub kind: Option<EntityKind>,
    pub entity_id: Option<i64>,
}

/// Aggregate of the pings for one (entity, bucket, status) group.
#[derive(Debug, Clone, PartialEq)]
pub struct PingTally {
    pub entity: EntityRef,
    /// Index of the fixed-width bucket counted from the query origin.
    pub bucket: i64,
    pub status: PingStatus,
    pub checks: u64,
    pub rtt_count: u64,
    pub rtt_sum: f64,
    pub rtt_max: Option<f64>,
    pub loss_count: u64,
    pub loss_sum: f64,
    pub loss_max: Option<f64>,
}

/// Grouped counts over `(since, until]`. Buckets are `bucket_width` wide and
/// numbered from `origin`, which must not be later than `since`.
pub fn tally_between(
    pool: &Pool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    origin: DateTime<Utc>,
    bucket_width: Duration,
    filter: PingFilter,
) -> Result<Vec<PingTally>> {
    let width_secs = bucket_width.num_seconds().max(1);
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id,
                (CAST(strftime('%s', checked_at) AS INTEGER) - ?3) / ?4 AS bucket,
                status, COUNT(*),
                COUNT(response_time_ms), TOTAL(response_time_ms), MAX(response_time_ms),
                COUNT(packet_loss), TOTAL(packet_loss), MAX(packet_loss)
         FROM ping_results
         WHERE checked_at > ?1 AND checked_at <= ?2
           AND (?5 IS NULL OR entity_type = ?5)
           AND (?6 IS NULL OR entity_id = ?6)
         GROUP BY entity_type, entity_id, bucket, status
         ORDER BY entity_type, entity_id, bucket",
    )?;
    let rows = stmt.query_map(
        params![
            to_db_time(since),
            to_db_time(until),
            origin.timestamp(),
            width_secs,
            filter.kind.map(|k| k.as_str()),
            filter.entity_id,
        ],
        |row| {
            let kind: String = row.get(0)?;
            let status: String = row.get(3)?;
            Ok(PingTally {
                entity: EntityRef {
                    kind: parse_db_enum(0, &kind)?,
                    id: row.get(1)?,
                },
                bucket: row.get(2)?,
                status: parse_db_enum(3, &status)?,
                checks: row.get::<_, i64>(4)? as u64,
                rtt_count: row.get::<_, i64>(5)? as u64,
                rtt_sum: row.get(6)?,
                rtt_max: row.get(7)?,
                loss_count: row.get::<_, i64>(8)? as u64,
                loss_sum: row.get(9)?,
                loss_max: row.get(10)?,
            })
        },
    )
    .context("Failed to aggregate ping results")?;

    let mut tallies = Vec::new();
    for r in rows {
        tallies.push(r?);
    }
    Ok(tallies)
}

fn ping_from_row(row: &Row<'_>) -> rusqlite::Result<PingResult> {
    let kind: String = row.get(1)?;
    let role: String = row.get(3)?;
    let status: String = row.get(5)?;
    let checked_at: String = row.get(8)?;

    Ok(PingResult {
        id: row.get(0)?,
        entity: EntityRef {
            kind: parse_db_enum(1, &kind)?,
            id: row.get(2)?,
        },
        address_role: parse_db_enum(3, &role)?,
        address: row.get(4)?,
        status: parse_db_enum(5, &status)?,
        response_time_ms: row.get(6)?,
        packet_loss: row.get(7)?,
        checked_at: parse_db_time(8, &checked_at)?,
    })
}

//! Period performance report: per-site uptime and latency plus a bucketed
//! time series for charting.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use thiserror::Error;

use super::health::HealthAggregator;
use super::stats::{percentage, round2, Series};
use crate::monitor::{EntityKind, EntityRef, MonitoredEntity, PingStatus};
use crate::storage::ping_log::{self, PingFilter, PingTally};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report period {0:?} (expected 1h, 6h, 24h, 7d or 30d)")]
    InvalidPeriod(String),
    #[error("an entity id filter requires an entity type")]
    EntityIdWithoutType,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportPeriod {
    Hour,
    SixHours,
    #[default]
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Hour => "1h",
            ReportPeriod::SixHours => "6h",
            ReportPeriod::Day => "24h",
            ReportPeriod::Week => "7d",
            ReportPeriod::Month => "30d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ReportPeriod::Hour => Duration::hours(1),
            ReportPeriod::SixHours => Duration::hours(6),
            ReportPeriod::Day => Duration::hours(24),
            ReportPeriod::Week => Duration::days(7),
            ReportPeriod::Month => Duration::days(30),
        }
    }

    pub fn bucket_minutes(&self) -> i64 {
        match self {
            ReportPeriod::Hour => 5,
            ReportPeriod::SixHours => 15,
            ReportPeriod::Day => 60,
            ReportPeriod::Week => 360,
            ReportPeriod::Month => 1440,
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportPeriod {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(ReportPeriod::Hour),
            "6h" => Ok(ReportPeriod::SixHours),
            "24h" | "1d" => Ok(ReportPeriod::Day),
            "7d" => Ok(ReportPeriod::Week),
            "30d" => Ok(ReportPeriod::Month),
            _ => Err(ReportError::InvalidPeriod(s.to_string())),
        }
    }
}

impl Serialize for ReportPeriod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceQuery {
    pub period: ReportPeriod,
    pub kind: Option<EntityKind>,
    pub entity_id: Option<i64>,
}

impl PerformanceQuery {
    fn filter(&self) -> Result<PingFilter, ReportError> {
        if self.entity_id.is_some() && self.kind.is_none() {
            return Err(ReportError::EntityIdWithoutType);
        }
        Ok(PingFilter {
            kind: self.kind,
            entity_id: self.entity_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Classification {
    pub fn from_uptime(uptime_pct: f64) -> Self {
        if uptime_pct >= 95.0 {
            Classification::Healthy
        } else if uptime_pct >= 90.0 {
            Classification::Degraded
        } else {
            Classification::Unhealthy
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub online: u64,
    pub slow: u64,
    pub offline: u64,
    pub error: u64,
    pub timeout: u64,
}

impl StatusCounts {
    fn add(&mut self, status: PingStatus, n: u64) {
        match status {
            PingStatus::Online => self.online += n,
            PingStatus::Slow => self.slow += n,
            PingStatus::Offline => self.offline += n,
            PingStatus::Error => self.error += n,
            PingStatus::Timeout => self.timeout += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.online + self.slow + self.offline + self.error + self.timeout
    }

    pub fn reachable(&self) -> u64 {
        self.online + self.slow
    }
}

/// Accumulates one group of pings (a site, or a time bucket).
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    statuses: StatusCounts,
    rtt: Series,
    loss: Series,
}

impl Tally {
    fn add(&mut self, group: &PingTally) {
        self.statuses.add(group.status, group.checks);
        if group.status.is_reachable() {
            self.rtt.merge(&Series {
                count: group.rtt_count,
                sum: group.rtt_sum,
                max: group.rtt_max,
            });
            self.loss.merge(&Series {
                count: group.loss_count,
                sum: group.loss_sum,
                max: group.loss_max,
            });
        }
    }

    fn uptime_pct(&self) -> Option<f64> {
        percentage(self.statuses.reachable(), self.statuses.total()).map(round2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPerformance {
    pub entity: EntityRef,
    /// Display label, absent for sites no longer registered.
    pub label: Option<String>,
    pub total_checks: u64,
    pub uptime_pct: f64,
    pub avg_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub avg_packet_loss: Option<f64>,
    pub statuses: StatusCounts,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub checks: u64,
    pub uptime_pct: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub avg_packet_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    pub entities: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub total_checks: u64,
    pub uptime_pct: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub period: ReportPeriod,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket_minutes: i64,
    pub summary: FleetSummary,
    /// Worst uptime first.
    pub entities: Vec<EntityPerformance>,
    pub series: Vec<TimeBucket>,
}

impl HealthAggregator {
    pub async fn performance_report(&self, query: PerformanceQuery) -> Result<PerformanceReport, ReportError> {
        self.performance_report_at(query, Utc::now()).await
    }

    /// Report over `(now - period, now]`.
    pub async fn performance_report_at(
        &self,
        query: PerformanceQuery,
        now: DateTime<Utc>,
    ) -> Result<PerformanceReport, ReportError> {
        let filter = query.filter()?;
        let from = now - query.period.duration();

        let labels: HashMap<EntityRef, String> = self
            .sources
            .all_monitored()
            .await?
            .iter()
            .map(|e: &MonitoredEntity| (e.entity_ref(), e.label()))
            .collect();

        let width = Duration::minutes(query.period.bucket_minutes());
        let first_bucket = from.duration_trunc(width).map_err(anyhow::Error::from)?;
        let groups = ping_log::tally_between(&self.pool, from, now, first_bucket, width, filter)?;

        let mut fleet = Tally::default();
        let mut per_entity: BTreeMap<EntityRef, Tally> = BTreeMap::new();
        let mut buckets: BTreeMap<i64, Tally> = BTreeMap::new();
        for group in &groups {
            fleet.add(group);
            per_entity.entry(group.entity).or_default().add(group);
            buckets.entry(group.bucket).or_default().add(group);
        }

        let mut entities: Vec<EntityPerformance> = per_entity
            .into_iter()
            .map(|(entity, tally)| {
                let uptime_pct = tally.uptime_pct().unwrap_or(0.0);
                EntityPerformance {
                    entity,
                    label: labels.get(&entity).cloned(),
                    total_checks: tally.statuses.total(),
                    uptime_pct,
                    avg_response_time_ms: tally.rtt.mean().map(round2),
                    max_response_time_ms: tally.rtt.max,
                    avg_packet_loss: tally.loss.mean().map(round2),
                    statuses: tally.statuses,
                    classification: Classification::from_uptime(uptime_pct),
                }
            })
            .collect();
        entities.sort_by(|a, b| {
            a.uptime_pct
                .total_cmp(&b.uptime_pct)
                .then_with(|| a.entity.cmp(&b.entity))
        });

        let mut series = Vec::new();
        let mut start = first_bucket;
        let mut index = 0;
        while start <= now {
            let tally = buckets.get(&index).copied().unwrap_or_default();
            series.push(TimeBucket {
                start,
                checks: tally.statuses.total(),
                uptime_pct: tally.uptime_pct(),
                avg_response_time_ms: tally.rtt.mean().map(round2),
                avg_packet_loss: tally.loss.mean().map(round2),
            });
            start += width;
            index += 1;
        }

        let count = |c: Classification| entities.iter().filter(|e| e.classification == c).count();
        let summary = FleetSummary {
            entities: entities.len(),
            healthy: count(Classification::Healthy),
            degraded: count(Classification::Degraded),
            unhealthy: count(Classification::Unhealthy),
            total_checks: fleet.statuses.total(),
            uptime_pct: fleet.uptime_pct(),
            avg_response_time_ms: fleet.rtt.mean().map(round2),
        };

        Ok(PerformanceReport {
            period: query.period,
            from,
            to: now,
            bucket_minutes: query.period.bucket_minutes(),
            summary,
            entities,
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::monitor::{AddressRole, NewBranch, SqliteEntitySource};
    use crate::probes::ProbeOutcome;
    use crate::storage::{test_pool, Pool};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Pool, HealthAggregator) {
        let (dir, pool) = test_pool();
        let sites = SqliteEntitySource::new(pool.clone());
        for n in 1..=2_i64 {
            sites
                .add_branch(&NewBranch {
                    name: ["Harbour Road", "Mill Lane"][n as usize - 1].to_string(),
                    code: format!("BR-{n:03}"),
                    primary_address: Some(format!("10.{n}.0.1")),
                    backup_address: None,
                })
                .unwrap();
        }
        let agg = HealthAggregator::new(pool.clone(), Arc::new(sites), HealthConfig::default());
        (dir, pool, agg)
    }

    fn ping(pool: &Pool, entity: EntityRef, status: PingStatus, rtt: Option<f64>, at: DateTime<Utc>) {
        let outcome = ProbeOutcome {
            status,
            response_time_ms: rtt,
            packet_loss: Some(if status.is_reachable() { 0.0 } else { 100.0 }),
        };
        ping_log::record_ping(pool, entity, AddressRole::Primary, "10.0.0.1", &outcome, at).unwrap();
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("7d".parse::<ReportPeriod>().unwrap(), ReportPeriod::Week);
        assert_eq!("24H".parse::<ReportPeriod>().unwrap(), ReportPeriod::Day);
        assert!(matches!(
            "2w".parse::<ReportPeriod>(),
            Err(ReportError::InvalidPeriod(_))
        ));
        assert_eq!(ReportPeriod::Month.bucket_minutes(), 1440);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(Classification::from_uptime(95.0), Classification::Healthy);
        assert_eq!(Classification::from_uptime(94.99), Classification::Degraded);
        assert_eq!(Classification::from_uptime(90.0), Classification::Degraded);
        assert_eq!(Classification::from_uptime(89.9), Classification::Unhealthy);
    }

    #[tokio::test]
    async fn test_entity_id_requires_type() {
        let (_dir, _pool, agg) = setup();
        let query = PerformanceQuery {
            entity_id: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            agg.performance_report_at(query, now()).await,
            Err(ReportError::EntityIdWithoutType)
        ));
    }

    #[tokio::test]
    async fn test_per_entity_uptime_and_latency() {
        let (_dir, pool, agg) = setup();
        let t = now();
        // Branch 1: 19 of 20 checks reachable, one of them slow.
        for i in 0..18 {
            ping(&pool, EntityRef::branch(1), PingStatus::Online, Some(20.0), t - Duration::minutes(5 * i + 1));
        }
        ping(&pool, EntityRef::branch(1), PingStatus::Slow, Some(590.0), t - Duration::minutes(200));
        ping(&pool, EntityRef::branch(1), PingStatus::Offline, None, t - Duration::minutes(205));
        // Branch 2: half down.
        ping(&pool, EntityRef::branch(2), PingStatus::Online, Some(40.0), t - Duration::minutes(10));
        ping(&pool, EntityRef::branch(2), PingStatus::Timeout, None, t - Duration::minutes(20));
        // Outside the 24h window.
        ping(&pool, EntityRef::branch(2), PingStatus::Offline, None, t - Duration::hours(30));

        let report = agg
            .performance_report_at(PerformanceQuery::default(), t)
            .await
            .unwrap();

        assert_eq!(report.period, ReportPeriod::Day);
        assert_eq!(report.entities.len(), 2);
        let worst = &report.entities[0];
        assert_eq!(worst.entity, EntityRef::branch(2));
        assert_eq!(worst.uptime_pct, 50.0);
        assert_eq!(worst.statuses.timeout, 1);
        assert_eq!(worst.classification, Classification::Unhealthy);

        let best = &report.entities[1];
        assert_eq!(best.label.as_deref(), Some("Branch Harbour Road (BR-001)"));
        assert_eq!(best.total_checks, 20);
        assert_eq!(best.uptime_pct, 95.0);
        assert_eq!(best.max_response_time_ms, Some(590.0));
        assert_eq!(best.avg_response_time_ms, Some(50.0));
        assert_eq!(best.classification, Classification::Healthy);

        assert_eq!(report.summary.entities, 2);
        assert_eq!(report.summary.healthy, 1);
        assert_eq!(report.summary.unhealthy, 1);
        assert_eq!(report.summary.total_checks, 22);
    }

    #[tokio::test]
    async fn test_series_buckets_cover_the_period() {
        let (_dir, pool, agg) = setup();
        let t = now() + Duration::minutes(7);
        ping(&pool, EntityRef::branch(1), PingStatus::Online, Some(10.0), t - Duration::minutes(1));
        ping(&pool, EntityRef::branch(1), PingStatus::Online, Some(30.0), t - Duration::minutes(2));
        ping(&pool, EntityRef::branch(2), PingStatus::Offline, None, t - Duration::minutes(50));

        let query = PerformanceQuery {
            period: ReportPeriod::Hour,
            ..Default::default()
        };
        let report = agg.performance_report_at(query, t).await.unwrap();

        assert_eq!(report.bucket_minutes, 5);
        // 11:07 -> 12:07 with 5 minute buckets aligned at 11:05.
        assert_eq!(report.series.first().unwrap().start, now() - Duration::minutes(55));
        assert_eq!(report.series.len(), 13);
        let checks: u64 = report.series.iter().map(|b| b.checks).sum();
        assert_eq!(checks, 3);

        let last = report.series.last().unwrap();
        assert_eq!(last.checks, 2);
        assert_eq!(last.avg_response_time_ms, Some(20.0));
        assert_eq!(last.uptime_pct, Some(100.0));
        assert!(report.series.iter().any(|b| b.uptime_pct == Some(0.0)));
    }

    #[tokio::test]
    async fn test_entity_filter() {
        let (_dir, pool, agg) = setup();
        let t = now();
        ping(&pool, EntityRef::branch(1), PingStatus::Online, Some(10.0), t - Duration::minutes(2));
        ping(&pool, EntityRef::branch(2), PingStatus::Offline, None, t - Duration::minutes(2));

        let query = PerformanceQuery {
            period: ReportPeriod::Hour,
            kind: Some(EntityKind::Branch),
            entity_id: Some(2),
        };
        let a = agg.performance_report_at(query, t).await.unwrap();
        let b = agg.performance_report_at(query, t).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.entities.len(), 1);
        assert_eq!(a.entities[0].entity, EntityRef::branch(2));
        assert_eq!(a.summary.uptime_pct, Some(0.0));
    }
}

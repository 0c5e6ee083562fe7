//! Fleet health snapshot: current status per site, rolling performance,
//! incident load, a single 0-100 score and the list of sites needing attention.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::analysis::stats::{percentage, round2, Series};
use crate::config::HealthConfig;
use crate::detect::{IncidentManager, NetworkIncident, Severity};
use crate::monitor::{
    AddressRole, EntityKind, EntityRef, EntitySource, MonitoredEntity, PingResult, PingStatus,
};
use crate::storage::{ping_log, Pool};

/// Which part of the fleet a snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "branch_id", rename_all = "snake_case")]
pub enum HealthScope {
    Global,
    /// The ATMs attached to one branch.
    Branch(i64),
}

impl HealthScope {
    fn includes(&self, entity: &MonitoredEntity) -> bool {
        match self {
            HealthScope::Global => true,
            HealthScope::Branch(id) => entity.kind == EntityKind::Atm && entity.branch_id == Some(*id),
        }
    }
}

/// Current status of one site as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Online,
    Slow,
    Offline,
    Error,
    Stale,
    Unknown,
}

impl HealthStatus {
    fn from_ping(status: PingStatus) -> Self {
        match status {
            PingStatus::Online => HealthStatus::Online,
            PingStatus::Slow => HealthStatus::Slow,
            PingStatus::Offline | PingStatus::Timeout => HealthStatus::Offline,
            PingStatus::Error => HealthStatus::Error,
        }
    }

    /// Ordering of the problem list; `None` for statuses that are not problems.
    fn problem_rank(&self) -> Option<u8> {
        match self {
            HealthStatus::Offline => Some(0),
            HealthStatus::Error => Some(1),
            HealthStatus::Stale => Some(2),
            HealthStatus::Slow => Some(3),
            HealthStatus::Online | HealthStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusDistribution {
    pub online: usize,
    pub slow: usize,
    pub offline: usize,
    pub error: usize,
    pub stale: usize,
    pub unknown: usize,
}

impl StatusDistribution {
    pub fn add(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Online => self.online += 1,
            HealthStatus::Slow => self.slow += 1,
            HealthStatus::Offline => self.offline += 1,
            HealthStatus::Error => self.error += 1,
            HealthStatus::Stale => self.stale += 1,
            HealthStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.online + self.slow + self.offline + self.error + self.stale + self.unknown
    }

    /// Share of ONLINE sites, 0 for an empty fleet.
    pub fn online_pct(&self) -> f64 {
        percentage(self.online as u64, self.total() as u64).unwrap_or(0.0)
    }
}

/// Response-time figures over the lookback window, reachable observations only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceWindow {
    pub lookback_hours: u64,
    pub samples: u64,
    pub avg_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub avg_packet_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentSummary {
    pub active: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub resolved_in_window: usize,
    /// Most recent active incidents, newest first.
    pub recent: Vec<NetworkIncident>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHealth {
    pub entity: EntityRef,
    pub name: String,
    pub code: String,
    pub status: HealthStatus,
    /// Role of the observation the status was taken from.
    pub address_role: Option<AddressRole>,
    pub address: Option<String>,
    pub response_time_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub scope: HealthScope,
    pub generated_at: DateTime<Utc>,
    pub total_entities: usize,
    pub distribution: StatusDistribution,
    pub online_pct: f64,
    pub performance: PerformanceWindow,
    pub incidents: IncidentSummary,
    pub health_score: u8,
    pub overall_status: OverallStatus,
    pub problems: Vec<EntityHealth>,
}

/// `round(0.6 * online% + 0.2 * incident impact + 0.2 * performance score)`.
pub fn health_score(distribution: &StatusDistribution, open_incidents: usize, avg_response_ms: Option<f64>) -> u8 {
    let online = distribution.online_pct();
    let incident_impact = (100.0 - 10.0 * open_incidents as f64).max(0.0);
    let performance = match avg_response_ms {
        Some(avg) => (100.0 - (avg - 100.0).max(0.0) / 10.0).max(0.0),
        None => 100.0,
    };
    let score = 0.6 * online + 0.2 * incident_impact + 0.2 * performance;
    score.round().clamp(0.0, 100.0) as u8
}

pub fn overall_status(score: u8, distribution: &StatusDistribution, open_incidents: usize) -> OverallStatus {
    if score < 50 || distribution.offline > 0 {
        OverallStatus::Critical
    } else if score < 80 || open_incidents > 0 || distribution.error > 0 {
        OverallStatus::Warning
    } else if distribution.slow > 0 || distribution.stale > 2 {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    }
}

/// Read-only view over the ping log and incident store.
#[derive(Clone)]
pub struct HealthAggregator {
    pub(crate) pool: Pool,
    pub(crate) sources: Arc<dyn EntitySource>,
    incidents: IncidentManager,
    config: HealthConfig,
}

impl HealthAggregator {
    pub fn new(pool: Pool, sources: Arc<dyn EntitySource>, config: HealthConfig) -> Self {
        Self {
            incidents: IncidentManager::new(pool.clone()),
            pool,
            sources,
            config,
        }
    }

    pub async fn snapshot(&self, scope: HealthScope) -> Result<HealthSnapshot> {
        self.snapshot_at(scope, Utc::now()).await
    }

    /// Snapshot as of `now`. Only data at or before `now` is considered.
    pub async fn snapshot_at(&self, scope: HealthScope, now: DateTime<Utc>) -> Result<HealthSnapshot> {
        let entities: Vec<MonitoredEntity> = self
            .sources
            .all_monitored()
            .await?
            .into_iter()
            .filter(|e| scope.includes(e))
            .collect();
        let in_scope: HashSet<EntityRef> = entities.iter().map(MonitoredEntity::entity_ref).collect();

        let latest: HashMap<(EntityRef, AddressRole), PingResult> = ping_log::latest_per_target(&self.pool, now)?
            .into_iter()
            .filter(|p| in_scope.contains(&p.entity))
            .map(|p| ((p.entity, p.address_role), p))
            .collect();

        let staleness = self.config.staleness();
        let mut distribution = StatusDistribution::default();
        let mut rows = Vec::with_capacity(entities.len());
        for entity in &entities {
            let row = entity_health(entity, &latest, now, staleness);
            distribution.add(row.status);
            rows.push(row);
        }

        let since = now - self.config.lookback();
        let performance = self.performance_window(&in_scope, since, now)?;
        let incidents = self.incident_summary(&in_scope, since, now)?;

        let score = health_score(&distribution, incidents.active, performance.avg_response_time_ms);
        let overall = overall_status(score, &distribution, incidents.active);

        let mut problems: Vec<EntityHealth> = rows
            .into_iter()
            .filter(|r| r.status.problem_rank().is_some())
            .collect();
        problems.sort_by(|a, b| {
            a.status
                .problem_rank()
                .cmp(&b.status.problem_rank())
                .then_with(|| a.entity.cmp(&b.entity))
        });
        problems.truncate(self.config.problem_limit);

        Ok(HealthSnapshot {
            scope,
            generated_at: now,
            total_entities: entities.len(),
            online_pct: round2(distribution.online_pct()),
            distribution,
            performance,
            incidents,
            health_score: score,
            overall_status: overall,
            problems,
        })
    }

    fn performance_window(
        &self,
        in_scope: &HashSet<EntityRef>,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PerformanceWindow> {
        let mut rtt = Series::default();
        let mut loss = Series::default();
        let groups = ping_log::tally_between(&self.pool, since, now, since, now - since, Default::default())?;
        for group in groups {
            if !in_scope.contains(&group.entity) || !group.status.is_reachable() {
                continue;
            }
            rtt.merge(&Series {
                count: group.rtt_count,
                sum: group.rtt_sum,
                max: group.rtt_max,
            });
            loss.merge(&Series {
                count: group.loss_count,
                sum: group.loss_sum,
                max: group.loss_max,
            });
        }

        Ok(PerformanceWindow {
            lookback_hours: self.config.lookback().num_hours() as u64,
            samples: rtt.count,
            avg_response_time_ms: rtt.mean().map(round2),
            max_response_time_ms: rtt.max,
            avg_packet_loss: loss.mean().map(round2),
        })
    }

    fn incident_summary(
        &self,
        in_scope: &HashSet<EntityRef>,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<IncidentSummary> {
        let active: Vec<NetworkIncident> = self
            .incidents
            .active_at(now)?
            .into_iter()
            .filter(|i| in_scope.contains(&i.entity))
            .collect();
        let resolved_in_window = self
            .incidents
            .resolved_between(since, now)?
            .iter()
            .filter(|i| in_scope.contains(&i.entity))
            .count();

        let count = |severity: Severity| active.iter().filter(|i| i.severity == severity).count();
        Ok(IncidentSummary {
            active: active.len(),
            critical: count(Severity::Critical),
            high: count(Severity::High),
            medium: count(Severity::Medium),
            resolved_in_window,
            recent: active
                .iter()
                .take(self.config.recent_incident_limit)
                .cloned()
                .collect(),
        })
    }
}

fn entity_health(
    entity: &MonitoredEntity,
    latest: &HashMap<(EntityRef, AddressRole), PingResult>,
    now: DateTime<Utc>,
    staleness: Duration,
) -> EntityHealth {
    let key = entity.entity_ref();
    let observation = latest
        .get(&(key, AddressRole::Primary))
        .or_else(|| latest.get(&(key, AddressRole::Backup)));

    let status = match observation {
        None => HealthStatus::Unknown,
        Some(p) if now - p.checked_at > staleness => HealthStatus::Stale,
        Some(p) => HealthStatus::from_ping(p.status),
    };

    EntityHealth {
        entity: key,
        name: entity.name.clone(),
        code: entity.code.clone(),
        status,
        address_role: observation.map(|p| p.address_role),
        address: observation.map(|p| p.address.clone()),
        response_time_ms: observation.and_then(|p| p.response_time_ms),
        packet_loss: observation.and_then(|p| p.packet_loss),
        last_checked: observation.map(|p| p.checked_at),
    }
}

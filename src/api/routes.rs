//! API route definitions.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::analysis::{HealthScope, PerformanceQuery, ReportPeriod};
use crate::monitor::EntityKind;

const DEFAULT_INCIDENT_LIMIT: usize = 50;
const MAX_INCIDENT_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/network/health", get(network_health))
        .route("/network/performance", get(network_performance))
        .route("/network/incidents", get(list_incidents))
        .route("/network/monitor", get(monitor_status))
        .route("/network/monitor/start", post(monitor_start))
        .route("/network/monitor/stop", post(monitor_stop))
        .route("/network/monitor/cycle", post(monitor_cycle))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

#[derive(Debug, Deserialize)]
struct HealthParams {
    branch_id: Option<i64>,
}

async fn network_health(
    State(state): State<AppState>,
    Query(params): Query<HealthParams>,
) -> Result<Json<Value>, ApiError> {
    let scope = match params.branch_id {
        Some(id) => HealthScope::Branch(id),
        None => HealthScope::Global,
    };
    let snapshot = state.aggregator.snapshot(scope).await?;
    Ok(Json(json!({ "data": snapshot, "meta": meta() })))
}

#[derive(Debug, Deserialize)]
struct PerformanceParams {
    period: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<i64>,
}

async fn network_performance(
    State(state): State<AppState>,
    Query(params): Query<PerformanceParams>,
) -> Result<Json<Value>, ApiError> {
    let period = match params.period.as_deref() {
        Some(p) => p.parse::<ReportPeriod>()?,
        None => ReportPeriod::default(),
    };
    let kind = params
        .entity_type
        .as_deref()
        .map(str::parse::<EntityKind>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let report = state
        .aggregator
        .performance_report(PerformanceQuery {
            period,
            kind,
            entity_id: params.entity_id,
        })
        .await?;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}

#[derive(Debug, Deserialize)]
struct IncidentParams {
    active: Option<bool>,
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<IncidentParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_INCIDENT_LIMIT)
        .clamp(1, MAX_INCIDENT_LIMIT);
    let active_only = params.active.unwrap_or(true);
    let incidents = state.incidents.list_recent(limit, active_only)?;
    Ok(Json(json!({
        "data": incidents,
        "meta": { "total": incidents.len(), "active_only": active_only, "limit": limit }
    })))
}

async fn monitor_status(State(state): State<AppState>) -> Json<Value> {
    let settings = state.scheduler.settings();
    Json(json!({
        "data": {
            "running": state.scheduler.is_running(),
            "interval_secs": settings.interval.as_secs(),
            "batch_size": settings.batch_size,
            "probe_timeout_secs": settings.probe_timeout.as_secs()
        },
        "meta": meta()
    }))
}

async fn monitor_start(State(state): State<AppState>) -> Json<Value> {
    let started = state.scheduler.start();
    Json(json!({
        "data": { "running": true, "changed": started },
        "meta": meta()
    }))
}

async fn monitor_stop(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.scheduler.stop();
    Json(json!({
        "data": { "running": false, "changed": stopped },
        "meta": meta()
    }))
}

async fn monitor_cycle(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.scheduler.run_cycle().await?;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}

#[cfg(test)]
mod tests {
    use crate::analysis::HealthAggregator;
    use crate::api::{router, state::AppState};
    use crate::config::{HealthConfig, MonitorConfig};
    use crate::detect::{IncidentDetector, IncidentManager};
    use crate::monitor::{NewBranch, SqliteEntitySource};
    use crate::probes::{ProbeOutcome, Prober};
    use crate::scheduler::MonitorScheduler;
    use crate::storage::test_pool;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt; // for `oneshot`

    struct AlwaysUp;

    #[async_trait::async_trait]
    impl Prober for AlwaysUp {
        async fn probe(&self, _address: &str, _timeout: Duration) -> anyhow::Result<ProbeOutcome> {
            Ok(ProbeOutcome::online(12.0))
        }
    }

    fn app() -> (tempfile::TempDir, axum::Router) {
        let (dir, pool) = test_pool();
        let sites = SqliteEntitySource::new(pool.clone());
        sites
            .add_branch(&NewBranch {
                name: "Harbour Road".to_string(),
                code: "BR-001".to_string(),
                primary_address: Some("10.1.0.1".to_string()),
                backup_address: None,
            })
            .unwrap();
        let sources = Arc::new(sites);

        let scheduler = MonitorScheduler::new(
            pool.clone(),
            sources.clone(),
            Arc::new(AlwaysUp),
            IncidentDetector::new(pool.clone(), None),
            (&MonitorConfig::default()).into(),
        );
        let state = AppState {
            scheduler,
            aggregator: HealthAggregator::new(pool.clone(), sources, HealthConfig::default()),
            incidents: IncidentManager::new(pool),
        };
        (dir, router(state))
    }

    async fn call(app: &axum::Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, app) = app();
        let (status, json) = call(&app, Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert!(json["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_cycle_then_health_snapshot() {
        let (_dir, app) = app();
        let (status, json) = call(&app, Method::POST, "/api/v1/network/monitor/cycle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["pings_written"], 1);

        let (status, json) = call(&app, Method::GET, "/api/v1/network/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["distribution"]["online"], 1);
        assert_eq!(json["data"]["overall_status"], "HEALTHY");
        assert_eq!(json["data"]["health_score"], 100);
    }

    #[tokio::test]
    async fn test_performance_rejects_bad_input() {
        let (_dir, app) = app();
        let (status, json) = call(&app, Method::GET, "/api/v1/network/performance?period=2w").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"]["message"].as_str().unwrap().contains("2w"));

        let (status, _) = call(&app, Method::GET, "/api/v1/network/performance?entity_id=3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/v1/network/performance?entity_type=kiosk").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(
            &app,
            Method::GET,
            "/api/v1/network/performance?period=7d&entity_type=branch&entity_id=1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["period"], "7d");
        assert_eq!(json["data"]["bucket_minutes"], 360);
    }

    #[tokio::test]
    async fn test_monitor_controls() {
        let (_dir, app) = app();
        let (_, json) = call(&app, Method::GET, "/api/v1/network/monitor").await;
        assert_eq!(json["data"]["running"], false);
        assert_eq!(json["data"]["interval_secs"], 300);

        let (_, json) = call(&app, Method::POST, "/api/v1/network/monitor/start").await;
        assert_eq!(json["data"]["changed"], true);
        let (_, json) = call(&app, Method::GET, "/api/v1/network/monitor").await;
        assert_eq!(json["data"]["running"], true);

        let (_, json) = call(&app, Method::POST, "/api/v1/network/monitor/stop").await;
        assert_eq!(json["data"]["changed"], true);
        let (_, json) = call(&app, Method::POST, "/api/v1/network/monitor/stop").await;
        assert_eq!(json["data"]["changed"], false);
    }

    #[tokio::test]
    async fn test_incidents_and_unknown_route() {
        let (_dir, app) = app();
        let (status, json) = call(&app, Method::GET, "/api/v1/network/incidents?active=false&limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["meta"]["limit"], 5);
        assert_eq!(json["data"].as_array().unwrap().len(), 0);

        let (status, json) = call(&app, Method::GET, "/api/v2/nothing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["status"], 404);
    }
}

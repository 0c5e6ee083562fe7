//! TOML configuration for branchwatch.
//!
//! Every section falls back to compiled-in defaults, so an empty file (or no
//! file at all) yields a working monitor.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "BRANCHWATCH_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/branchwatch/branchwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the monitor process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchwatchConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BranchwatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded branchwatch configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. An explicit path (CLI `--config`), which must load.
    /// 2. The path in `BRANCHWATCH_CONFIG`.
    /// 3. `/etc/branchwatch/branchwatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BRANCHWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Storage / API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/branchwatch.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Monitoring cycle
// ---------------------------------------------------------------------------

/// Batch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles.
    pub interval_secs: u64,
    /// Sites probed concurrently per batch.
    pub batch_size: usize,
    /// Upper bound for one probe, enforced around the prober.
    pub probe_timeout_secs: u64,
    /// Start the scheduler together with `serve`.
    pub autostart: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_size: 10,
            probe_timeout_secs: 10,
            autostart: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

/// ICMP prober settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path (or bare command name resolved via `$PATH`) to the ping binary.
    pub ping_binary: String,
    /// Echo requests per check.
    pub ping_count: u32,
    /// Average RTT above this is reported as SLOW.
    pub slow_threshold_ms: f64,
    /// Partial loss at or above this percentage is reported as ERROR.
    pub congestion_loss_pct: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_binary: "ping".to_string(),
            ping_count: 3,
            slow_threshold_ms: 500.0,
            congestion_loss_pct: 20.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Health aggregation
// ---------------------------------------------------------------------------

/// Dashboard read-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Observations older than this are reported as STALE.
    pub staleness_secs: u64,
    /// Lookback for the rolling performance window.
    pub lookback_hours: u64,
    /// Problem list cap.
    pub problem_limit: usize,
    /// Active incidents listed in a snapshot.
    pub recent_incident_limit: usize,
}

/// Upper bound for the read-path windows.
const MAX_LOOKBACK_HOURS: u64 = 24 * 365;
const MAX_STALENESS_SECS: u64 = MAX_LOOKBACK_HOURS * 3600;

impl HealthConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs.clamp(1, MAX_STALENESS_SECS) as i64)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours.clamp(1, MAX_LOOKBACK_HOURS) as i64)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 300,
            lookback_hours: 24,
            problem_limit: 10,
            recent_incident_limit: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

/// Where CRITICAL incidents are filed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Code of the service definition tickets are filed under.
    pub service_code: String,
    /// Username of the system account that files tickets.
    pub system_user: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_code: "NETWORK".to_string(),
            system_user: "system".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = BranchwatchConfig::default();

        assert_eq!(cfg.storage.db_path, "data/branchwatch.db");
        assert_eq!(cfg.api.bind, "0.0.0.0:8080");

        assert_eq!(cfg.monitor.interval(), Duration::from_secs(300));
        assert_eq!(cfg.monitor.batch_size, 10);
        assert!(cfg.monitor.autostart);

        assert_eq!(cfg.probe.ping_binary, "ping");
        assert_eq!(cfg.probe.ping_count, 3);

        assert_eq!(cfg.health.staleness_secs, 300);
        assert_eq!(cfg.health.lookback_hours, 24);
        assert_eq!(cfg.health.problem_limit, 10);

        assert!(cfg.escalation.enabled);
        assert_eq!(cfg.escalation.service_code, "NETWORK");
        assert_eq!(cfg.escalation.system_user, "system");

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[storage]
db_path = "/var/lib/branchwatch/monitor.db"

[api]
bind = "127.0.0.1:9000"

[monitor]
interval_secs = 60
batch_size = 25
probe_timeout_secs = 4
autostart = false

[probe]
ping_binary = "/usr/bin/ping"
ping_count = 5
slow_threshold_ms = 250.0
congestion_loss_pct = 10.0

[health]
staleness_secs = 120
lookback_hours = 6
problem_limit = 5

[escalation]
enabled = false
service_code = "NET-OPS"
system_user = "netmon"

[logging]
level = "debug"
json = true
"#;

        let cfg: BranchwatchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.storage.db_path, "/var/lib/branchwatch/monitor.db");
        assert_eq!(cfg.api.bind, "127.0.0.1:9000");
        assert_eq!(cfg.monitor.interval(), Duration::from_secs(60));
        assert_eq!(cfg.monitor.batch_size, 25);
        assert_eq!(cfg.monitor.probe_timeout(), Duration::from_secs(4));
        assert!(!cfg.monitor.autostart);
        assert_eq!(cfg.probe.ping_count, 5);
        assert_eq!(cfg.probe.slow_threshold_ms, 250.0);
        assert_eq!(cfg.health.staleness_secs, 120);
        assert_eq!(cfg.health.problem_limit, 5);
        assert_eq!(cfg.health.recent_incident_limit, 10);
        assert!(!cfg.escalation.enabled);
        assert_eq!(cfg.escalation.service_code, "NET-OPS");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: BranchwatchConfig = toml::from_str("").unwrap();
        let defaults = BranchwatchConfig::default();

        assert_eq!(cfg.storage.db_path, defaults.storage.db_path);
        assert_eq!(cfg.monitor.interval_secs, defaults.monitor.interval_secs);
        assert_eq!(cfg.health.staleness_secs, defaults.health.staleness_secs);
    }

    #[test]
    fn test_zero_durations_are_clamped() {
        let cfg: BranchwatchConfig =
            toml::from_str("[monitor]\ninterval_secs = 0\nprobe_timeout_secs = 0\n").unwrap();
        assert_eq!(cfg.monitor.interval(), Duration::from_secs(1));
        assert_eq!(cfg.monitor.probe_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_health_windows_are_clamped() {
        let cfg: BranchwatchConfig = toml::from_str(&format!(
            "[health]\nstaleness_secs = {}\nlookback_hours = {}\n",
            i64::MAX,
            i64::MAX
        ))
        .unwrap();
        assert_eq!(cfg.health.lookback(), chrono::Duration::days(365));
        assert_eq!(cfg.health.staleness(), chrono::Duration::days(365));

        let zero: BranchwatchConfig =
            toml::from_str("[health]\nstaleness_secs = 0\nlookback_hours = 0\n").unwrap();
        assert_eq!(zero.health.staleness(), chrono::Duration::seconds(1));
        assert_eq!(zero.health.lookback(), chrono::Duration::hours(1));

        let defaults = BranchwatchConfig::default();
        assert_eq!(defaults.health.staleness(), chrono::Duration::minutes(5));
        assert_eq!(defaults.health.lookback(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("branchwatch.toml");
        std::fs::write(&path, "[monitor]\nbatch_size = 3\n").unwrap();

        let cfg = BranchwatchConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.monitor.batch_size, 3);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = BranchwatchConfig::resolve(Some(Path::new("/nonexistent/branchwatch.toml")));
        assert!(result.is_err());
    }
}

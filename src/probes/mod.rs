use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::monitor::PingStatus;

pub mod icmp;

pub use self::icmp::IcmpProber;

/// Result of one reachability check against one address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: PingStatus,
    pub response_time_ms: Option<f64>,
    /// Percentage, 0-100.
    pub packet_loss: Option<f64>,
}

impl ProbeOutcome {
    pub fn online(response_time_ms: f64) -> Self {
        Self {
            status: PingStatus::Online,
            response_time_ms: Some(response_time_ms),
            packet_loss: Some(0.0),
        }
    }

    pub fn offline() -> Self {
        Self {
            status: PingStatus::Offline,
            response_time_ms: None,
            packet_loss: Some(100.0),
        }
    }
}

/// Reasons a probe could not be carried out at all.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("refusing to probe invalid address {0:?}")]
    InvalidAddress(String),
    #[error("failed to execute {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for network reachability probes.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Check one address. An `Err` means the check itself could not run;
    /// an unreachable address is an `Ok` with a failing status.
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeOutcome>;
}

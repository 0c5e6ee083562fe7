use super::{ProbeError, ProbeOutcome, Prober};
use crate::config::ProbeConfig;
use crate::monitor::PingStatus;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// ICMP probe wrapper around the system `ping` binary.
pub struct IcmpProber {
    binary: String,
    count: u32,
    thresholds: Thresholds,
}

/// Cut-offs used to turn RTT and loss into a status.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub slow_ms: f64,
    pub congestion_loss_pct: f64,
}

impl IcmpProber {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            binary: config.ping_binary.clone(),
            count: config.ping_count.max(1),
            thresholds: Thresholds {
                slow_ms: config.slow_threshold_ms,
                congestion_loss_pct: config.congestion_loss_pct,
            },
        }
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeOutcome> {
        validate_address(address)?;

        // -W is the per-reply wait in whole seconds.
        let reply_wait = (timeout.as_secs() / self.count as u64).max(1);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(reply_wait.to_string())
            .arg("-q")
            .arg(address)
            .kill_on_drop(true);

        let deadline = timeout + Duration::from_secs(1);
        let output = match tokio::time::timeout(deadline, cmd.output()).await {
            Ok(res) => res.map_err(|source| ProbeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?,
            Err(_) => {
                debug!(%address, ?deadline, "ping exceeded deadline");
                return Ok(ProbeOutcome {
                    status: PingStatus::Timeout,
                    response_time_ms: None,
                    packet_loss: None,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let loss = extract_packet_loss(&stdout);
        let rtt = extract_avg_rtt(&stdout);

        match loss {
            Some(loss) => Ok(ProbeOutcome {
                status: classify(rtt, loss, self.thresholds),
                response_time_ms: rtt,
                packet_loss: Some(loss),
            }),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(%address, code = ?output.status.code(), stderr = %stderr.trim(), "Unparseable ping output");
                Ok(ProbeOutcome {
                    status: PingStatus::Error,
                    response_time_ms: None,
                    packet_loss: None,
                })
            }
        }
    }
}

/// Map RTT and loss onto a status. Full loss is OFFLINE, heavy partial loss
/// is ERROR (congestion), high latency is SLOW.
pub fn classify(rtt_ms: Option<f64>, loss_pct: f64, thresholds: Thresholds) -> PingStatus {
    match rtt_ms {
        None => PingStatus::Offline,
        Some(_) if loss_pct >= 100.0 => PingStatus::Offline,
        Some(_) if loss_pct >= thresholds.congestion_loss_pct => PingStatus::Error,
        Some(rtt) if rtt > thresholds.slow_ms => PingStatus::Slow,
        Some(_) => PingStatus::Online,
    }
}

/// Addresses come from the asset inventory; refuse anything that could be
/// read as a flag or carries shell-ish characters.
fn validate_address(address: &str) -> Result<(), ProbeError> {
    let ok = !address.is_empty()
        && !address.starts_with('-')
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '%'));
    if !ok {
        return Err(ProbeError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// "3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms"
fn extract_packet_loss(output: &str) -> Option<f64> {
    let end = output.find("% packet loss")?;
    let head = &output[..end];
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    head[start..].parse::<f64>().ok()
}

/// "rtt min/avg/max/mdev = 14.188/14.188/14.188/0.000 ms" (Linux)
/// "round-trip min/avg/max/stddev = ..." (BSD / macOS)
fn extract_avg_rtt(output: &str) -> Option<f64> {
    let line = output
        .lines()
        .find(|l| l.contains("min/avg/max") && l.contains(" = "))?;
    let (_, values) = line.split_once(" = ")?;
    values.split('/').nth(1)?.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: Thresholds = Thresholds {
        slow_ms: 500.0,
        congestion_loss_pct: 20.0,
    };

    const LINUX_OK: &str = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.

--- 10.0.0.1 ping statistics ---
3 packets transmitted, 3 received, 0% packet loss, time 2003ms
rtt min/avg/max/mdev = 14.188/15.250/16.012/0.750 ms
";

    const LINUX_PARTIAL: &str = "--- 10.0.0.1 ping statistics ---
3 packets transmitted, 2 received, 33.3333% packet loss, time 2004ms
rtt min/avg/max/mdev = 40.1/41.0/42.3/0.9 ms
";

    const LINUX_DOWN: &str = "--- 10.0.0.9 ping statistics ---
3 packets transmitted, 0 received, 100% packet loss, time 2050ms
";

    const MACOS_OK: &str = "--- 10.0.0.1 ping statistics ---
3 packets transmitted, 3 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 1.1/2.2/3.3/0.4 ms
";

    #[test]
    fn test_parse_linux_output() {
        assert_eq!(extract_packet_loss(LINUX_OK), Some(0.0));
        assert_eq!(extract_avg_rtt(LINUX_OK), Some(15.25));
        assert_eq!(extract_packet_loss(LINUX_DOWN), Some(100.0));
        assert_eq!(extract_avg_rtt(LINUX_DOWN), None);
    }

    #[test]
    fn test_parse_partial_loss() {
        let loss = extract_packet_loss(LINUX_PARTIAL).unwrap();
        assert!((loss - 33.3333).abs() < 1e-9);
    }

    #[test]
    fn test_parse_macos_output() {
        assert_eq!(extract_packet_loss(MACOS_OK), Some(0.0));
        assert_eq!(extract_avg_rtt(MACOS_OK), Some(2.2));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(15.0), 0.0, THRESHOLDS), PingStatus::Online);
        assert_eq!(classify(Some(750.0), 0.0, THRESHOLDS), PingStatus::Slow);
        assert_eq!(classify(Some(41.0), 33.3, THRESHOLDS), PingStatus::Error);
        assert_eq!(classify(None, 100.0, THRESHOLDS), PingStatus::Offline);
        // Exactly at the slow threshold is still online.
        assert_eq!(classify(Some(500.0), 0.0, THRESHOLDS), PingStatus::Online);
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("10.20.30.40").is_ok());
        assert!(validate_address("atm-12.branch.local").is_ok());
        assert!(validate_address("fe80::1%eth0").is_ok());
        assert!(validate_address("-f").is_err());
        assert!(validate_address("10.0.0.1; rm -rf /").is_err());
        assert!(validate_address("").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_probe_error() {
        let prober = IcmpProber::new(&ProbeConfig {
            ping_binary: "/nonexistent/branchwatch-ping".to_string(),
            ..Default::default()
        });
        let err = prober
            .probe("10.0.0.1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProbeError>(),
            Some(ProbeError::Spawn { .. })
        ));

        let err = prober.probe("-c", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProbeError>(),
            Some(ProbeError::InvalidAddress(_))
        ));
    }
}

//! Forwarder health monitoring (C5).
//!
//! Each forwarder server is probed on its own interval with a minimal DNS
//! query; results feed a windowed aggregate per spec. §4.5, which in turn
//! drives the `unknown -> healthy -> degraded -> unhealthy` state machine
//! and the alert-dedup policy.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dnsctl_api::{ForwardPolicy, ForwarderServer, ForwarderTestResult, HealthStatus};
use domain::base::iana::{Class, Rtype};
use domain::base::{Message, MessageBuilder, Name};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::AlertThresholds;

/// How many consecutive cycles a candidate aggregate must hold before it
/// replaces the forwarder's confirmed `health_status` (spec. §4.5, default
/// K=2). Immediate transitions to `unhealthy` after
/// `thresholds.consecutive_failures` bypass this gate entirely.
pub const CONSECUTIVE_CYCLES_REQUIRED: i64 = 2;

/// Send a single `. IN NS` query to `server` and report whether it answered
/// within `probe_timeout`.
pub async fn probe_server(server: &ForwarderServer, probe_timeout: Duration) -> ForwarderTestResult {
    let started = Instant::now();
    match probe_once(server.ip, server.port, probe_timeout).await {
        Ok(()) => ForwarderTestResult {
            server: server.ip,
            ok: true,
            response_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(detail) => ForwarderTestResult {
            server: server.ip,
            ok: false,
            response_ms: None,
            error: Some(detail),
        },
    }
}

async fn probe_once(ip: IpAddr, port: u16, probe_timeout: Duration) -> Result<(), String> {
    let root = Name::<Bytes>::from_str(".").expect(". is always a valid name");
    let mut builder = MessageBuilder::new_vec();
    builder.header_mut().set_rd(true);
    let mut question = builder.question();
    question
        .push((&root, Rtype::NS, Class::IN))
        .map_err(|e| e.to_string())?;
    let query = question.finish();

    let local_addr: SocketAddr = if ip.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local_addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    socket
        .connect(SocketAddr::new(ip, port))
        .await
        .map_err(|e| format!("connect failed: {e}"))?;

    timeout(probe_timeout, socket.send(&query))
        .await
        .map_err(|_| "send timed out".to_string())?
        .map_err(|e| format!("send failed: {e}"))?;

    let mut buf = [0u8; 512];
    let n = timeout(probe_timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| "response timed out".to_string())?
        .map_err(|e| format!("recv failed: {e}"))?;

    let response = Message::from_octets(Bytes::copy_from_slice(&buf[..n]))
        .map_err(|_| "malformed response".to_string())?;
    if response.header().rcode() != domain::base::iana::Rcode::NOERROR {
        return Err(format!("rcode {:?}", response.header().rcode()));
    }
    Ok(())
}

/// Aggregate one probe cycle's per-server results into a candidate
/// [`HealthStatus`], per spec. §4.5: all servers ok -> `healthy`; some ok
/// some failed -> `degraded` only under `forward_policy=first` with at
/// least one ok, else `unhealthy`; none ok -> `unhealthy`.
pub fn classify_cycle(servers_total: usize, servers_ok: usize, forward_policy: ForwardPolicy) -> HealthStatus {
    if servers_total == 0 {
        return HealthStatus::Unknown;
    }
    if servers_ok == servers_total {
        HealthStatus::Healthy
    } else if servers_ok == 0 {
        HealthStatus::Unhealthy
    } else if forward_policy == ForwardPolicy::First {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

/// Derive a [`HealthStatus`] from the rolling sample aggregate alone (alert
/// thresholds on response time / failure rate), independent of the
/// per-cycle server aggregation in [`classify_cycle`]. Used to decide
/// whether to fire a `health_alert`, not to drive the confirmed status.
pub fn classify_from_samples(
    samples: i64,
    failures: i64,
    avg_response_ms: Option<f64>,
    thresholds: &AlertThresholds,
) -> HealthStatus {
    if samples == 0 {
        return HealthStatus::Unknown;
    }

    let fail_rate = failures as f64 / samples as f64;
    if fail_rate >= thresholds.fail_rate_critical {
        return HealthStatus::Unhealthy;
    }
    if fail_rate >= thresholds.fail_rate_warn {
        return HealthStatus::Degraded;
    }

    if let Some(avg) = avg_response_ms {
        if avg >= thresholds.response_ms_critical as f64 {
            return HealthStatus::Unhealthy;
        }
        if avg >= thresholds.response_ms_warn as f64 {
            return HealthStatus::Degraded;
        }
    }

    HealthStatus::Healthy
}

/// Result of gating a cycle's candidate status against the forwarder's
/// currently confirmed status and the K-consecutive-cycles rule.
pub struct Gated {
    /// The confirmed status to persist as `health_status`.
    pub confirmed: HealthStatus,
    /// Candidate status still accumulating cycles, if any (`None` once
    /// confirmed catches up with the candidate).
    pub candidate: Option<HealthStatus>,
    pub candidate_count: i64,
    /// Whether `confirmed` just changed this cycle (drives
    /// `forwarder_status_change`).
    pub transitioned: bool,
}

/// Apply the K-consecutive-cycles transition rule (spec. §4.5), except
/// for the immediate escalation to `unhealthy` once `consecutive_failures`
/// reaches `thresholds.consecutive_failures`.
#[allow(clippy::too_many_arguments)]
pub fn gate_transition(
    confirmed: HealthStatus,
    cycle_candidate: HealthStatus,
    previous_candidate: Option<HealthStatus>,
    previous_candidate_count: i64,
    consecutive_failures: u32,
    thresholds: &AlertThresholds,
) -> Gated {
    if consecutive_failures >= thresholds.consecutive_failures && confirmed != HealthStatus::Unhealthy {
        return Gated {
            confirmed: HealthStatus::Unhealthy,
            candidate: None,
            candidate_count: 0,
            transitioned: true,
        };
    }

    if cycle_candidate == confirmed {
        return Gated {
            confirmed,
            candidate: None,
            candidate_count: 0,
            transitioned: false,
        };
    }

    let count = if previous_candidate == Some(cycle_candidate) {
        previous_candidate_count + 1
    } else {
        1
    };

    if count >= CONSECUTIVE_CYCLES_REQUIRED {
        Gated {
            confirmed: cycle_candidate,
            candidate: None,
            candidate_count: 0,
            transitioned: true,
        }
    } else {
        Gated {
            confirmed,
            candidate: Some(cycle_candidate),
            candidate_count: count,
            transitioned: false,
        }
    }
}

/// Only alert on a transition, not on every cycle a forwarder stays
/// unhealthy, so operators see one alert per incident rather than one per
/// probe interval.
pub fn should_alert(previous: HealthStatus, next: HealthStatus) -> bool {
    previous != next && matches!(next, HealthStatus::Degraded | HealthStatus::Unhealthy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AlertThresholds {
        AlertThresholds::default()
    }

    #[test]
    fn healthy_with_no_failures() {
        let status = classify_from_samples(10, 0, Some(20.0), &thresholds());
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn degraded_past_fail_rate_warn() {
        let status = classify_from_samples(10, 2, Some(20.0), &thresholds());
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn cycle_all_ok_is_healthy() {
        assert_eq!(classify_cycle(2, 2, ForwardPolicy::First), HealthStatus::Healthy);
    }

    #[test]
    fn cycle_partial_ok_degraded_under_first_policy() {
        assert_eq!(classify_cycle(2, 1, ForwardPolicy::First), HealthStatus::Degraded);
    }

    #[test]
    fn cycle_partial_ok_unhealthy_under_only_policy() {
        assert_eq!(classify_cycle(2, 1, ForwardPolicy::Only), HealthStatus::Unhealthy);
    }

    #[test]
    fn cycle_none_ok_is_unhealthy() {
        assert_eq!(classify_cycle(2, 0, ForwardPolicy::First), HealthStatus::Unhealthy);
    }

    #[test]
    fn gate_requires_k_consecutive_cycles_before_transition() {
        let t = thresholds();
        let first = gate_transition(HealthStatus::Healthy, HealthStatus::Degraded, None, 0, 0, &t);
        assert!(!first.transitioned);
        assert_eq!(first.candidate, Some(HealthStatus::Degraded));
        assert_eq!(first.candidate_count, 1);

        let second = gate_transition(
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            first.candidate,
            first.candidate_count,
            0,
            &t,
        );
        assert!(second.transitioned);
        assert_eq!(second.confirmed, HealthStatus::Degraded);
    }

    #[test]
    fn gate_transitions_to_unhealthy_immediately_on_consecutive_failures() {
        let t = thresholds();
        let gated = gate_transition(HealthStatus::Healthy, HealthStatus::Degraded, None, 0, t.consecutive_failures, &t);
        assert!(gated.transitioned);
        assert_eq!(gated.confirmed, HealthStatus::Unhealthy);
    }

    #[test]
    fn alerts_only_on_transition_into_bad_states() {
        assert!(should_alert(HealthStatus::Healthy, HealthStatus::Unhealthy));
        assert!(!should_alert(HealthStatus::Unhealthy, HealthStatus::Unhealthy));
        assert!(!should_alert(HealthStatus::Unhealthy, HealthStatus::Healthy));
    }
}

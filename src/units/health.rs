//! The health unit: probes every active forwarder's servers and keeps
//! `forwarders.health_status` up to date (spec. §4.5).
//!
//! Driven by the scheduler (C8): it calls [`HealthUnit::probe_due_round`]
//! on its own tick rather than this unit keeping its own ticker, so C5
//! shares one lease/overrun-tracked schedule with every other periodic
//! job instead of running an independent interval.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::center::Center;
use crate::comms::ApplicationCommand;
use crate::model::forwarder as forwarder_model;

#[derive(Clone)]
pub struct HealthUnit {
    center: Arc<Center>,
}

impl HealthUnit {
    pub fn new(center: Arc<Center>) -> Self {
        Self { center }
    }

    pub async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<ApplicationCommand>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let _ = ready_tx.send(());
        info!("health unit ready");

        loop {
            match cmd_rx.recv().await {
                Some(ApplicationCommand::Terminate) | None => {
                    info!("health unit terminating");
                    return;
                }
                Some(ApplicationCommand::Reconfigure) => debug!("health unit reconfigured"),
            }
        }
    }

    /// Probe every active, health-check-enabled forwarder whose own
    /// `interval_s` has elapsed since `last_checked_at`. Probes across
    /// forwarders and across servers within a forwarder run concurrently
    /// (spec. §4.5 concurrency note).
    pub async fn probe_due_round(&self) -> Result<(), dnsctl_store::StoreError> {
        let mut tx = self.center.store.begin().await?;
        let forwarders = dnsctl_store::list_forwarders(&mut tx, true).await?;
        tx.commit().await?;

        let now = Timestamp::now();
        let due: Vec<_> = forwarders
            .into_iter()
            .filter(|row| {
                let health_check = forwarder_model::decode_health_check(&row.health_check_json);
                if !health_check.enabled {
                    return false;
                }
                match row.last_checked_at {
                    None => true,
                    Some(last) => {
                        let elapsed = (now.as_second() - last.as_second()).max(0);
                        elapsed >= health_check.interval_s as i64
                    }
                }
            })
            .collect();

        let mut tasks = tokio::task::JoinSet::new();
        for row in due {
            let center = self.center.clone();
            tasks.spawn(async move { probe_one_forwarder(&center, row).await });
        }
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("forwarder probe failed: {err}"),
                Err(err) => warn!("forwarder probe task panicked: {err}"),
            }
        }
        Ok(())
    }
}

async fn probe_one_forwarder(
    center: &Arc<Center>,
    row: dnsctl_store::ForwarderRow,
) -> Result<(), dnsctl_store::StoreError> {
    let health_check = forwarder_model::decode_health_check(&row.health_check_json);
    let servers = forwarder_model::decode_servers(&row.servers_json);
    let enabled_servers: Vec<_> = servers.iter().filter(|s| s.enabled).collect();
    let probe_timeout = Duration::from_secs(health_check.timeout_s as u64);
    let forward_policy = forwarder_model::forward_policy_from_str(&row.forward_policy);

    let mut probes = tokio::task::JoinSet::new();
    for server in &enabled_servers {
        let server = (*server).clone();
        probes.spawn(async move {
            crate::health::probe_server(&server, probe_timeout).await
        });
    }
    let mut results = Vec::with_capacity(enabled_servers.len());
    while let Some(result) = probes.join_next().await {
        if let Ok(r) = result {
            results.push(r);
        }
    }

    let mut tx = center.store.begin().await?;
    let mut consecutive_failures = 0u32;
    let mut servers_ok = 0usize;
    for result in &results {
        if result.ok {
            servers_ok += 1;
            consecutive_failures = 0;
        } else {
            consecutive_failures += 1;
        }
        dnsctl_store::insert_health_sample(
            &mut tx,
            row.id,
            &result.server.to_string(),
            Timestamp::now(),
            result.ok,
            result.response_ms.map(|v| v as i64),
            result.error.as_deref(),
        )
        .await?;
    }

    let aggregate = dnsctl_store::aggregate_recent_health(&mut tx, row.id, 20).await?;
    let confirmed_status = forwarder_model::health_status_from_str(&row.health_status);
    let previous_candidate = row
        .candidate_status
        .as_deref()
        .map(forwarder_model::health_status_from_str);
    let thresholds = &center.config.alert_thresholds;

    let cycle_candidate = crate::health::classify_cycle(enabled_servers.len(), servers_ok, forward_policy);
    let gated = crate::health::gate_transition(
        confirmed_status,
        cycle_candidate,
        previous_candidate,
        row.candidate_count,
        consecutive_failures,
        thresholds,
    );

    dnsctl_store::update_forwarder_health(
        &mut tx,
        row.id,
        forwarder_model::health_status_str(gated.confirmed),
        gated.candidate.map(forwarder_model::health_status_str),
        gated.candidate_count,
        Timestamp::now(),
    )
    .await?;
    tx.commit().await?;

    if gated.transitioned {
        center.publish(dnsctl_api::Event {
            event: dnsctl_api::EventType::ForwarderStatusChange,
            data: serde_json::json!({
                "forwarder_id": row.id,
                "from": forwarder_model::health_status_str(confirmed_status),
                "to": forwarder_model::health_status_str(gated.confirmed),
            }),
            ts: Timestamp::now(),
        });
    }

    let sample_status =
        crate::health::classify_from_samples(aggregate.samples, aggregate.failures, aggregate.avg_response_ms, thresholds);
    let alert_status = if gated.confirmed == dnsctl_api::HealthStatus::Unhealthy {
        gated.confirmed
    } else {
        sample_status
    };
    if crate::health::should_alert(confirmed_status, alert_status) {
        warn!(
            "forwarder '{}' is now {}",
            row.name,
            forwarder_model::health_status_str(alert_status)
        );
        center.publish(dnsctl_api::Event {
            event: dnsctl_api::EventType::HealthAlert,
            data: serde_json::json!({
                "forwarder_id": row.id,
                "name": row.name,
                "status": forwarder_model::health_status_str(alert_status),
                "samples": aggregate.samples,
                "failures": aggregate.failures,
            }),
            ts: Timestamp::now(),
        });
    }

    Ok(())
}

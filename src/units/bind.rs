//! The BIND unit: drives the controller in `crate::bind` from deploy
//! requests, coalescing bursts of requests into a single deploy (spec.
//! §4.3, §5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::center::{Center, DeployRequest};
use crate::comms::ApplicationCommand;

pub struct BindUnit {
    center: Arc<Center>,
}

impl BindUnit {
    pub fn new(center: Arc<Center>) -> Self {
        Self { center }
    }

    pub async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<ApplicationCommand>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let Some(mut deploy_rx) = self.center.take_deploy_rx().await else {
            error!("bind unit started with no deploy receiver; another unit already took it");
            let _ = ready_tx.send(());
            return;
        };

        let _ = ready_tx.send(());
        info!("bind unit ready");

        loop {
            let request = tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(ApplicationCommand::Terminate) | None => {
                        info!("bind unit terminating");
                        return;
                    }
                    Some(ApplicationCommand::Reconfigure) => {
                        info!("bind unit reconfigured");
                        continue;
                    }
                },
                request = deploy_rx.recv() => match request {
                    Some(request) => request,
                    None => {
                        warn!("deploy channel closed, bind unit terminating");
                        return;
                    }
                },
            };

            self.coalesce_and_deploy(request, &mut deploy_rx).await;
        }
    }

    /// Drain any further deploy requests that arrive within the configured
    /// coalescing window before actually deploying, so a burst of zone/
    /// record/forwarder/RPZ edits produces one reload instead of many.
    async fn coalesce_and_deploy(
        &self,
        first: DeployRequest,
        deploy_rx: &mut mpsc::UnboundedReceiver<DeployRequest>,
    ) {
        let mut last_reason = first.reason;
        let wait = self.center.config.deploy_coalesce_max_wait;
        if wait > Duration::ZERO {
            let deadline = tokio::time::Instant::now() + wait;
            loop {
                match tokio::time::timeout_at(deadline, deploy_rx.recv()).await {
                    Ok(Some(next)) => last_reason = next.reason,
                    Ok(None) | Err(_) => break,
                }
            }
        }

        info!("deploying ({last_reason})");
        let started = Instant::now();
        match crate::bind::deploy(&self.center.store, &self.center.config).await {
            Ok(outcome) if !outcome.changed => {
                info!("deploy was a no-op, serial {} unchanged", outcome.serial);
                self.center.metrics.record_deploy(started.elapsed(), true);
                self.center.publish(dnsctl_api::Event {
                    event: dnsctl_api::EventType::BindReload,
                    data: serde_json::json!({
                        "status": "no_change",
                        "serial": outcome.serial,
                        "reason": last_reason.to_string(),
                    }),
                    ts: jiff::Timestamp::now(),
                });
            }
            Ok(outcome) => {
                info!("deploy succeeded, serial {}", outcome.serial);
                self.center.metrics.record_deploy(started.elapsed(), true);
                self.center.publish(dnsctl_api::Event {
                    event: dnsctl_api::EventType::BindReload,
                    data: serde_json::json!({
                        "status": "ok",
                        "serial": outcome.serial,
                        "reason": last_reason.to_string(),
                    }),
                    ts: jiff::Timestamp::now(),
                });
            }
            Err(err) => {
                error!("deploy failed: {err}");
                self.center.metrics.record_deploy(started.elapsed(), false);
                self.center.publish(dnsctl_api::Event {
                    event: dnsctl_api::EventType::BindReload,
                    data: serde_json::json!({
                        "status": "error",
                        "reason": last_reason.to_string(),
                        "error": err.to_string(),
                    }),
                    ts: jiff::Timestamp::now(),
                });
            }
        }
    }
}

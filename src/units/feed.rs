//! The feed unit: fetches each enabled threat feed once its own due-ness
//! window has elapsed, and applies the resulting diff through the RPZ
//! service layer (spec. §4.6).
//!
//! Driven by the scheduler (C8): [`FeedUnit::run_due_round`] is called on
//! the scheduler's tick rather than this unit keeping its own ticker.
//! Due-ness is computed from `last_attempt_at`/`update_frequency_s` as
//! stored in C1, so it survives a restart; a feed in `last_status=error`
//! backs off exponentially (base `update_frequency_s`, doubling per
//! `consecutive_errors`, capped at 6h) instead of retrying every round.

use std::sync::Arc;

use jiff::Timestamp;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::center::Center;
use crate::comms::ApplicationCommand;
use crate::model::feed as feed_model;

const MAX_BACKOFF_SECS: i64 = 6 * 60 * 60;

#[derive(Clone)]
pub struct FeedUnit {
    center: Arc<Center>,
}

impl FeedUnit {
    pub fn new(center: Arc<Center>) -> Self {
        Self { center }
    }

    pub async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<ApplicationCommand>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let _ = ready_tx.send(());
        info!("feed unit ready");

        loop {
            match cmd_rx.recv().await {
                Some(ApplicationCommand::Terminate) | None => {
                    info!("feed unit terminating");
                    return;
                }
                Some(ApplicationCommand::Reconfigure) => debug!("feed unit reconfigured"),
            }
        }
    }

    pub async fn run_due_round(&self) -> Result<(), dnsctl_store::StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dnsctld/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("static reqwest client config is always valid");

        let mut tx = self.center.store.begin().await?;
        let feeds = dnsctl_store::list_feeds(&mut tx, true).await?;
        tx.commit().await?;

        let now = Timestamp::now();
        for row in feeds {
            if !is_due(&row, now) {
                continue;
            }
            if let Err(err) = self.run_one_feed(&client, &row).await {
                warn!("feed '{}' ingestion failed: {err}", row.name);
            }
        }
        Ok(())
    }

    async fn run_one_feed(
        &self,
        client: &reqwest::Client,
        row: &dnsctl_store::ThreatFeedRow,
    ) -> Result<(), dnsctl_store::StoreError> {
        let format = feed_model::format_from_str(&row.format);
        let request_timeout = self.center.config.feed_http_timeout;

        let outcome = crate::feed::fetch_feed(
            client,
            &row.url,
            format,
            row.etag.as_deref(),
            row.last_modified.as_deref(),
            request_timeout,
        )
        .await;

        match outcome {
            crate::feed::FetchOutcome::NotModified => {
                debug!("feed '{}' not modified", row.name);
                let mut tx = self.center.store.begin().await?;
                dnsctl_store::record_feed_attempt(
                    &mut tx, row.id, "ok", true, None, None, None, Timestamp::now(),
                )
                .await?;
                tx.commit().await?;
            }
            crate::feed::FetchOutcome::Error(detail) => {
                error!("feed '{}' fetch failed: {detail}", row.name);
                let mut tx = self.center.store.begin().await?;
                dnsctl_store::record_feed_attempt(
                    &mut tx, row.id, "error", false, None, None, None, Timestamp::now(),
                )
                .await?;
                tx.commit().await?;
                self.center.publish(dnsctl_api::Event {
                    event: dnsctl_api::EventType::ThreatFeedError,
                    data: serde_json::json!({ "feed_id": row.id, "name": row.name, "error": detail }),
                    ts: Timestamp::now(),
                });
            }
            crate::feed::FetchOutcome::Fetched { domains, etag, last_modified } => {
                let source = crate::feed::source_tag(row.id);

                let mut tx = self.center.store.begin().await?;
                let existing = dnsctl_store::list_rpz_rules_by_source(&mut tx, &source).await?;
                let others = dnsctl_store::list_active_rpz_rules(&mut tx).await?;
                tx.commit().await?;

                let diff = crate::feed::compute_diff(&row.rpz_zone, &row.category, &domains, &existing, &others);
                let applied = crate::service::apply_rpz_diff(&self.center, &source, diff).await;

                let mut tx = self.center.store.begin().await?;
                match &applied {
                    Ok(_) => {
                        dnsctl_store::record_feed_attempt(
                            &mut tx, row.id, "ok", true,
                            etag.as_deref(), last_modified.as_deref(),
                            Some(domains.len() as i64), Timestamp::now(),
                        )
                        .await?;
                    }
                    Err(err) => {
                        dnsctl_store::record_feed_attempt(
                            &mut tx, row.id, "error", false, None, None, None, Timestamp::now(),
                        )
                        .await?;
                        warn!("feed '{}' diff apply failed: {err}", row.name);
                    }
                }
                tx.commit().await?;

                if applied.is_ok() {
                    info!("feed '{}' ingested {} domains", row.name, domains.len());
                    self.center.publish(dnsctl_api::Event {
                        event: dnsctl_api::EventType::ThreatFeedUpdated,
                        data: serde_json::json!({ "feed_id": row.id, "name": row.name, "domains": domains.len() }),
                        ts: Timestamp::now(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// `last_success_at + update_frequency_s <= now`, or (on a feed currently
/// in error) that interval doubled once per `consecutive_errors`, capped
/// at `MAX_BACKOFF_SECS` (spec. §4.6).
fn is_due(row: &dnsctl_store::ThreatFeedRow, now: Timestamp) -> bool {
    let Some(last_attempt) = row.last_attempt_at else {
        return true;
    };
    let base = row.update_frequency_s.max(1);
    let window = if row.last_status == "error" {
        let backoff = base.saturating_mul(1i64 << row.consecutive_errors.min(20));
        backoff.min(MAX_BACKOFF_SECS)
    } else {
        base
    };
    now.as_second() - last_attempt.as_second() >= window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_row(update_frequency_s: i64, last_status: &str, consecutive_errors: i64, last_attempt_age: i64) -> dnsctl_store::ThreatFeedRow {
        let now = Timestamp::now();
        dnsctl_store::ThreatFeedRow {
            id: 1,
            name: "test".into(),
            url: "https://example.invalid/list.txt".into(),
            format: "plain".into(),
            category: "malware".into(),
            rpz_zone: "rpz.malware".into(),
            update_frequency_s,
            enabled: true,
            last_status: last_status.into(),
            last_attempt_at: Some(Timestamp::from_second(now.as_second() - last_attempt_age).unwrap()),
            last_success_at: None,
            etag: None,
            last_modified: None,
            rule_count: 0,
            consecutive_errors,
            version: 0,
        }
    }

    #[test]
    fn never_attempted_is_always_due() {
        let mut row = feed_row(3600, "ok", 0, 0);
        row.last_attempt_at = None;
        assert!(is_due(&row, Timestamp::now()));
    }

    #[test]
    fn not_due_before_update_frequency_elapses() {
        let row = feed_row(3600, "ok", 0, 60);
        assert!(!is_due(&row, Timestamp::now()));
    }

    #[test]
    fn due_once_update_frequency_elapses() {
        let row = feed_row(3600, "ok", 0, 3601);
        assert!(is_due(&row, Timestamp::now()));
    }

    #[test]
    fn backs_off_exponentially_while_erroring() {
        let row = feed_row(60, "error", 3, 400);
        // base 60 * 2^3 = 480s, so 400s in isn't due yet
        assert!(!is_due(&row, Timestamp::now()));
        let row = feed_row(60, "error", 3, 500);
        assert!(is_due(&row, Timestamp::now()));
    }

    #[test]
    fn backoff_is_capped() {
        let row = feed_row(60, "error", 40, MAX_BACKOFF_SECS - 1);
        assert!(!is_due(&row, Timestamp::now()));
    }
}

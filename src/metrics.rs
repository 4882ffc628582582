//! Maintaining and outputting metrics.
//!
//! Relevant sources for selecting metrics, metric names, and labels:
//! - https://prometheus.io/docs/practices/naming/
//! - https://prometheus.io/docs/instrumenting/writing_exporters/#labels
//! - https://prometheus.io/docs/practices/instrumentation/
//! - https://github.com/prometheus/OpenMetrics/blob/main/specification/OpenMetrics.md

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::{Registry, Unit};

use crate::center::Center;

//------------ Module Configuration ------------------------------------------

/// The application prefix to use in the names of Prometheus metrics.
const PROMETHEUS_PREFIX: &str = "dnsctld";

//------------ MetricsCollection ---------------------------------------------

#[derive(Debug)]
pub struct MetricsCollection {
    /// The metrics registry for all metrics in dnsctld. Units register
    /// their metrics with this registry.
    pub registry: Registry,

    /// How long the last metrics scrape took to assemble.
    assemble_time_metric: Gauge<u64, AtomicU64>,

    /// Metrics pulled live from the store on every scrape.
    state: StateMetrics,

    /// Metrics updated in place by units as events happen, rather than
    /// recomputed from the store on each scrape.
    live: LiveMetrics,
}

impl MetricsCollection {
    pub fn new() -> Self {
        let mut col = Self {
            registry: Registry::with_prefix(PROMETHEUS_PREFIX),
            assemble_time_metric: Default::default(),
            state: Default::default(),
            live: Default::default(),
        };

        let build_info = Info::new(vec![("version", clap::crate_version!())]);
        col.registry.register("build", "dnsctld build information", build_info);

        col.registry.register_with_unit(
            "metrics_assemble_duration",
            "The time taken in milliseconds to assemble the last metric snapshot",
            Unit::Other("milliseconds".into()),
            col.assemble_time_metric.clone(),
        );

        col.state.register_metrics(&mut col.registry);
        col.live.register_metrics(&mut col.registry);

        col
    }

    /// Re-read current counts from the store and render the full text
    /// exposition, including the live metrics units update as they run.
    pub async fn assemble(&self, center: &Center) -> Result<String, fmt::Error> {
        let start_time = Instant::now();

        if let Err(err) = self.state.refresh(center).await {
            tracing::warn!("failed to refresh metrics from the store: {err}");
        }

        let assemble_ms = start_time.elapsed().as_millis() as u64;
        self.assemble_time_metric.set(assemble_ms);
        String::try_from(self)
    }

    /// Record the outcome and duration of a deploy (C3), called by the bind
    /// unit after every `crate::bind::deploy` attempt.
    pub fn record_deploy(&self, elapsed: Duration, success: bool) {
        self.live.deploy_duration_ms.set(elapsed.as_millis() as i64);
        self.live.deploys_total.inc();
        if !success {
            self.live.deploy_failures_total.inc();
        }
    }

    /// Track how many WS control-plane sessions are connected (C7); called
    /// on connect and again on disconnect.
    pub fn set_ws_sessions_connected(&self, count: i64) {
        self.live.ws_sessions_connected.set(count);
    }

    /// Count an event dropped from a session's outgoing queue under
    /// backpressure (C7).
    pub fn inc_ws_events_dropped(&self) {
        self.live.ws_events_dropped_total.inc();
    }
}

impl TryFrom<&MetricsCollection> for String {
    type Error = fmt::Error;

    fn try_from(metrics: &MetricsCollection) -> Result<Self, Self::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricsCollection {
    fn default() -> Self {
        Self::new()
    }
}

//------------ StringLabel ----------------------------------------------------

/// A single free-text label value, used for categories/statuses/sources
/// that come out of the store as plain strings.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StringLabel {
    value: StoredString,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct StoredString(String);

impl EncodeLabelValue for StoredString {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> Result<(), std::fmt::Error> {
        encoder.write_str(&self.0)
    }
}

impl StringLabel {
    fn new(value: impl Into<String>) -> Self {
        Self {
            value: StoredString(value.into()),
        }
    }
}

//------------ StateMetrics --------------------------------------------------

/// Metrics recomputed from the store on every scrape, mirroring how cheap
/// read-only `COUNT`/`SELECT` queries already are in this daemon (there is
/// no bulk in-memory cache to keep in sync, unlike a zone-tree pipeline).
#[derive(Debug, Default)]
struct StateMetrics {
    zones_total: Gauge,
    zones_active: Gauge,
    records_total: Gauge,
    forwarders_total: Gauge,
    forwarders_active: Gauge,
    forwarders_by_health: Family<StringLabel, Gauge>,
    rpz_rules_active: Gauge,
    rpz_rules_by_category: Family<StringLabel, Gauge>,
    feeds_total: Gauge,
    feeds_enabled: Gauge,
    feeds_by_status: Family<StringLabel, Gauge>,
    snapshots_retained: Gauge,
}

impl StateMetrics {
    fn register_metrics(&self, reg: &mut Registry) {
        reg.register("zones", "Number of zones known to dnsctld", self.zones_total.clone());
        reg.register("zones_active", "Number of active (non-paused) zones", self.zones_active.clone());
        reg.register("records", "Number of DNS records across all zones", self.records_total.clone());
        reg.register("forwarders", "Number of configured forward zones", self.forwarders_total.clone());
        reg.register(
            "forwarders_active",
            "Number of active forward zones",
            self.forwarders_active.clone(),
        );
        reg.register(
            "forwarders_by_health",
            "Number of forwarders in each health status",
            self.forwarders_by_health.clone(),
        );
        reg.register(
            "rpz_rules_active",
            "Number of active RPZ rules",
            self.rpz_rules_active.clone(),
        );
        reg.register(
            "rpz_rules_by_category",
            "Number of active RPZ rules per category",
            self.rpz_rules_by_category.clone(),
        );
        reg.register("threat_feeds", "Number of configured threat feeds", self.feeds_total.clone());
        reg.register(
            "threat_feeds_enabled",
            "Number of enabled threat feeds",
            self.feeds_enabled.clone(),
        );
        reg.register(
            "threat_feeds_by_status",
            "Number of threat feeds in each last-fetch status",
            self.feeds_by_status.clone(),
        );
        reg.register(
            "config_snapshots_retained",
            "Number of configuration snapshots currently retained for rollback",
            self.snapshots_retained.clone(),
        );
    }

    async fn refresh(&self, center: &Center) -> Result<(), dnsctl_store::StoreError> {
        let mut tx = center.store.begin().await?;

        let zones = dnsctl_store::list_zones(
            &mut tx,
            false,
            dnsctl_store::Page { offset: 0, limit: 100_000 },
            dnsctl_store::SortOrder::Asc,
        )
        .await?;
        self.zones_total.set(zones.len() as i64);
        self.zones_active.set(zones.iter().filter(|z| z.is_active).count() as i64);

        let mut record_count = 0i64;
        for zone in &zones {
            let records = dnsctl_store::list_records(
                &mut tx,
                zone.id,
                dnsctl_store::Page { offset: 0, limit: 100_000 },
            )
            .await?;
            record_count += records.len() as i64;
        }
        self.records_total.set(record_count);

        let forwarders = dnsctl_store::list_forwarders(&mut tx, false).await?;
        self.forwarders_total.set(forwarders.len() as i64);
        self.forwarders_active.set(forwarders.iter().filter(|f| f.is_active).count() as i64);
        self.forwarders_by_health.clear();
        for f in &forwarders {
            self.forwarders_by_health
                .get_or_create(&StringLabel::new(f.health_status.clone()))
                .inc();
        }

        let rpz_rules = dnsctl_store::list_active_rpz_rules(&mut tx).await?;
        self.rpz_rules_active.set(rpz_rules.len() as i64);
        self.rpz_rules_by_category.clear();
        for rule in &rpz_rules {
            self.rpz_rules_by_category
                .get_or_create(&StringLabel::new(rule.category.clone()))
                .inc();
        }

        let feeds = dnsctl_store::list_feeds(&mut tx, false).await?;
        self.feeds_total.set(feeds.len() as i64);
        self.feeds_enabled.set(feeds.iter().filter(|f| f.enabled).count() as i64);
        self.feeds_by_status.clear();
        for feed in &feeds {
            self.feeds_by_status
                .get_or_create(&StringLabel::new(feed.last_status.clone()))
                .inc();
        }

        let snapshots = dnsctl_store::list_snapshots(&mut tx).await?;
        self.snapshots_retained.set(snapshots.len() as i64);

        tx.commit().await?;
        Ok(())
    }
}

//------------ LiveMetrics ----------------------------------------------------

/// Metrics units push to directly as events happen, rather than derive
/// from the store on each scrape.
#[derive(Debug, Default)]
struct LiveMetrics {
    deploy_duration_ms: Gauge,
    deploys_total: Counter,
    deploy_failures_total: Counter,
    ws_sessions_connected: Gauge,
    ws_events_dropped_total: Counter,
}

impl LiveMetrics {
    fn register_metrics(&self, reg: &mut Registry) {
        reg.register_with_unit(
            "deploy_duration",
            "How long the most recent BIND deploy took",
            Unit::Other("milliseconds".into()),
            self.deploy_duration_ms.clone(),
        );
        reg.register("deploys", "Total number of BIND deploys attempted", self.deploys_total.clone());
        reg.register(
            "deploy_failures",
            "Total number of BIND deploys that failed validation or reload",
            self.deploy_failures_total.clone(),
        );
        reg.register(
            "ws_sessions_connected",
            "Number of connected WebSocket control-plane sessions",
            self.ws_sessions_connected.clone(),
        );
        reg.register(
            "ws_events_dropped",
            "Total number of events dropped from a session's outgoing queue under backpressure",
            self.ws_events_dropped_total.clone(),
        );
    }
}

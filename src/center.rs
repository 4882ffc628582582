//! The daemon's central, shared state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::info;

use crate::comms::ApplicationCommand;
use crate::config::Config;
use crate::log::Logger;
use crate::metrics::MetricsCollection;
use dnsctl_api::Event;
use dnsctl_store::Store;

//----------- Center --------------------------------------------------------------

/// Everything every unit needs a handle to.
///
/// Unlike the zone-tree caches a signing pipeline needs, dnsctld has no
/// large in-memory working set of its own: [`Store`] is the source of
/// truth, and units re-read it on demand inside one transaction per
/// mutation (spec. §4.1, §5). `Center` therefore mostly wires units
/// together rather than holding bulk state.
pub struct Center {
    /// The persistence layer (C1).
    pub store: Store,

    /// The configuration the daemon was started with.
    pub config: Config,

    /// The logger.
    pub logger: &'static Logger,

    /// Broadcast sender for the event bus (C7). Every subscriber gets its
    /// own receiver via `event_tx.subscribe()`; slow subscribers lag rather
    /// than block publishers, matching the bounded-queue backpressure
    /// semantics each WS session layers on top.
    pub event_tx: broadcast::Sender<Event>,

    /// A channel to ask the BIND controller (C3) to deploy the current
    /// database state.
    pub deploy_tx: mpsc::UnboundedSender<DeployRequest>,

    /// The receiving half of `deploy_tx`, taken by the bind unit on startup.
    /// Wrapped so `Center` can be built before the unit that owns the
    /// receiver exists; `main.rs` constructs both halves together.
    deploy_rx: Mutex<Option<mpsc::UnboundedReceiver<DeployRequest>>>,

    /// A channel to send units application commands, keyed by unit name.
    pub app_cmd_tx: mpsc::UnboundedSender<(String, ApplicationCommand)>,

    /// A channel to send the central command updates.
    pub update_tx: mpsc::UnboundedSender<Update>,

    /// Prometheus metrics, scraped over HTTP by the http server unit (C7).
    pub metrics: MetricsCollection,
}

impl fmt::Debug for Center {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Center").finish_non_exhaustive()
    }
}

impl Center {
    pub fn new(
        store: Store,
        config: Config,
        logger: &'static Logger,
        event_tx: broadcast::Sender<Event>,
        deploy_tx: mpsc::UnboundedSender<DeployRequest>,
        deploy_rx: mpsc::UnboundedReceiver<DeployRequest>,
        app_cmd_tx: mpsc::UnboundedSender<(String, ApplicationCommand)>,
        update_tx: mpsc::UnboundedSender<Update>,
    ) -> Self {
        Self {
            store,
            config,
            logger,
            event_tx,
            deploy_tx,
            deploy_rx: Mutex::new(Some(deploy_rx)),
            app_cmd_tx,
            update_tx,
            metrics: MetricsCollection::new(),
        }
    }

    /// Publish an event to every connected WS subscriber. Never-drop event
    /// kinds are still subject to this fan-out; per-session backpressure
    /// handling happens downstream in the event bus unit (C7).
    pub fn publish(&self, event: Event) {
        // `send` only errors when there are no receivers, which is a normal
        // state (no WS clients connected) rather than a failure.
        let _ = self.event_tx.send(event);
    }

    /// Ask the BIND controller to deploy and reload, coalescing with any
    /// other request already queued up within the configured window
    /// (spec. §4.3, §5).
    pub fn request_deploy(&self, reason: DeployReason) {
        let _ = self.deploy_tx.send(DeployRequest { reason });
    }

    /// Take the deploy-request receiver. Called exactly once, by the bind
    /// unit during its own startup; every later call gets `None`.
    pub async fn take_deploy_rx(&self) -> Option<mpsc::UnboundedReceiver<DeployRequest>> {
        self.deploy_rx.lock().await.take()
    }
}

//----------- DeployRequest --------------------------------------------------------

/// A request to re-render and reload BIND's configuration.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub reason: DeployReason,
}

/// Why a deploy was requested, used only for audit/log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployReason {
    ZoneChanged,
    RecordChanged,
    ForwarderChanged,
    RpzChanged,
    Manual,
    Startup,
}

impl fmt::Display for DeployReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZoneChanged => "zone changed",
            Self::RecordChanged => "record changed",
            Self::ForwarderChanged => "forwarder changed",
            Self::RpzChanged => "RPZ rules changed",
            Self::Manual => "manual request",
            Self::Startup => "startup reconciliation",
        })
    }
}

//----------- Update -----------------------------------------------------------

/// A message sent to the central command loop.
#[derive(Debug, Clone)]
pub enum Update {
    Changed(Change),
}

/// A change to durable state, broadcast internally so units can react
/// (e.g. the scheduler re-evaluating due health probes after a forwarder is
/// added).
#[derive(Debug, Clone)]
pub enum Change {
    ZoneAdded(i64),
    ZoneChanged(i64),
    ZoneRemoved(i64),
    RecordChanged(i64),
    ForwarderAdded(i64),
    ForwarderChanged(i64),
    ForwarderRemoved(i64),
    RpzRulesChanged,
    FeedChanged(i64),
    ConfigChanged,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZoneAdded(id) => write!(f, "zone {id} added"),
            Self::ZoneChanged(id) => write!(f, "zone {id} changed"),
            Self::ZoneRemoved(id) => write!(f, "zone {id} removed"),
            Self::RecordChanged(id) => write!(f, "record {id} changed"),
            Self::ForwarderAdded(id) => write!(f, "forwarder {id} added"),
            Self::ForwarderChanged(id) => write!(f, "forwarder {id} changed"),
            Self::ForwarderRemoved(id) => write!(f, "forwarder {id} removed"),
            Self::RpzRulesChanged => f.write_str("RPZ rules changed"),
            Self::FeedChanged(id) => write!(f, "threat feed {id} changed"),
            Self::ConfigChanged => f.write_str("configuration changed"),
        }
    }
}

/// Run the central command loop: log every update and nudge a deploy when
/// the change plausibly affects rendered output.
pub async fn run_central_command(
    center: Arc<Center>,
    mut update_rx: mpsc::UnboundedReceiver<Update>,
) {
    while let Some(Update::Changed(change)) = update_rx.recv().await {
        info!("{change}");
        let reason = match change {
            Change::ZoneAdded(_) | Change::ZoneChanged(_) | Change::ZoneRemoved(_) => {
                Some(DeployReason::ZoneChanged)
            }
            Change::RecordChanged(_) => Some(DeployReason::RecordChanged),
            Change::ForwarderAdded(_) | Change::ForwarderChanged(_) | Change::ForwarderRemoved(_) => {
                Some(DeployReason::ForwarderChanged)
            }
            Change::RpzRulesChanged | Change::FeedChanged(_) => Some(DeployReason::RpzChanged),
            Change::ConfigChanged => None,
        };
        if let Some(reason) = reason {
            center.request_deploy(reason);
        }
    }
}

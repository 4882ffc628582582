//! The event bus and its per-user WebSocket sessions (C7, spec. §4.7).
//!
//! `Center::event_tx` is a plain [`tokio::sync::broadcast`] channel; this
//! module is the one subscriber that turns it into the control-plane's
//! wire protocol, enforcing a single live session per authenticated user
//! and the queue-depth / backpressure policy described in the spec:
//! critical events (`EventType::is_critical`) are never dropped,
//! everything else is dropped from the front of a bounded queue once it
//! fills up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use dnsctl_api::{ClientFrame, Event, EventType, ServerFrame};
use jiff::Timestamp;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::center::Center;
use crate::metrics::MetricsCollection;

/// Close code for a missing or unrecognized `?token=`.
const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code for exceeding [`MAX_MISSED_PONGS`] without a reply.
const CLOSE_PING_TIMEOUT: u16 = 4408;
/// Close code sent to a session evicted by the same user reconnecting.
const CLOSE_SUPERSEDED: u16 = 4409;
/// How many consecutive unanswered pings close the session.
const MAX_MISSED_PONGS: u32 = 2;

fn all_event_types() -> Vec<EventType> {
    vec![
        EventType::ZoneCreated,
        EventType::ZoneUpdated,
        EventType::ZoneDeleted,
        EventType::RecordCreated,
        EventType::RecordUpdated,
        EventType::RecordDeleted,
        EventType::ForwarderCreated,
        EventType::ForwarderUpdated,
        EventType::ForwarderDeleted,
        EventType::ForwarderStatusChange,
        EventType::HealthUpdate,
        EventType::HealthAlert,
        EventType::SecurityAlert,
        EventType::RpzRuleCreated,
        EventType::RpzRuleUpdated,
        EventType::RpzRuleDeleted,
        EventType::ThreatFeedUpdated,
        EventType::ThreatFeedError,
        EventType::BindReload,
        EventType::ConfigChange,
        EventType::SystemStatus,
        EventType::SessionExpired,
        EventType::SubscriptionUpdated,
        EventType::ConnectionEstablished,
    ]
}

/// Enforces a single live control-plane session per authenticated user: a
/// new connection for the same identity evicts whoever held that user's
/// slot before it, but different users each get their own slot (spec.
/// §4.7, P8) rather than one connection evicting the whole control plane.
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `identity`'s slot, evicting whoever held it. Returns a
    /// receiver that fires once *this* session is itself evicted by a
    /// later connection from the same identity.
    async fn acquire(&self, identity: String) -> oneshot::Receiver<()> {
        let (evict_tx, evict_rx) = oneshot::channel();
        let previous = self.slots.lock().await.insert(identity.clone(), evict_tx);
        if let Some(previous_evict) = previous {
            debug!("evicting control-plane session for '{identity}'");
            let _ = previous_evict.send(());
        }
        evict_rx
    }

    /// Release `identity`'s slot on a clean exit. A session that was
    /// itself evicted must not call this -- its slot already belongs to
    /// the session that evicted it.
    async fn release(&self, identity: &str) {
        self.slots.lock().await.remove(identity);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one WebSocket connection end to end: reject an unauthenticated
/// caller outright, otherwise claim that identity's slot, greet the
/// client, then alternate between inbound control frames and outbound bus
/// events until the socket closes, a newer session for the same identity
/// evicts this one, or too many pings go unanswered.
pub async fn handle_socket(
    socket: WebSocket,
    center: Arc<Center>,
    registry: Arc<SessionRegistry>,
    identity: Option<String>,
) {
    use futures_util::{SinkExt, StreamExt};

    let (mut sink, mut stream) = socket.split();

    let Some(identity) = identity else {
        debug!("rejecting control-plane session: missing or unrecognized auth token");
        let _ = sink
            .send(close_message(CLOSE_UNAUTHORIZED, "missing or unrecognized auth token"))
            .await;
        return;
    };

    let mut evict_rx = registry.acquire(identity.clone()).await;
    let mut events_rx = center.event_tx.subscribe();
    let mut subscriptions: HashSet<EventType> = all_event_types().into_iter().collect();
    let mut dropped: u64 = 0;
    let queue_cap = center.config.ws_max_queue;
    let mut queue: VecDeque<ServerFrame> = VecDeque::with_capacity(queue_cap.min(64));

    let greeting = ServerFrame::ConnectionEstablished {
        user_id: identity.clone(),
        default_subs: subscriptions.iter().copied().collect(),
    };
    if send_frame(&mut sink, &greeting).await.is_err() {
        return;
    }
    info!("control-plane session '{identity}' established");
    center.metrics.set_ws_sessions_connected(1);
    let _connected_guard = ConnectedGuard { metrics: &center.metrics };

    let mut ping_interval = tokio::time::interval(center.config.ws_ping_interval);
    ping_interval.tick().await; // first tick fires immediately; skip it
    let mut missed_pongs: u32 = 0;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut evict_rx => {
                info!("control-plane session '{identity}' evicted by a newer connection");
                let _ = send_frame(&mut sink, &ServerFrame::Event {
                    event: EventType::SessionExpired,
                    data: serde_json::json!({ "reason": "superseded by a newer session" }),
                    ts: Timestamp::now(),
                }).await;
                let _ = sink.send(close_message(CLOSE_SUPERSEDED, "superseded by a newer session")).await;
                break SessionEnd::Evicted;
            }
            _ = ping_interval.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    warn!("control-plane session '{identity}' missed {missed_pongs} pings, closing");
                    let _ = sink.send(close_message(CLOSE_PING_TIMEOUT, "missed too many pings")).await;
                    break SessionEnd::Closed;
                }
                missed_pongs += 1;
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break SessionEnd::Closed;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&text, &mut subscriptions, &mut queue, &mut dropped);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("control-plane session '{identity}' closed");
                        break SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("control-plane session '{identity}' read error: {err}");
                        break SessionEnd::Closed;
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => enqueue_event(event, &subscriptions, queue_cap, &mut queue, &mut dropped, &center.metrics),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => dropped += skipped,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break SessionEnd::Closed,
                }
            }
        }

        let mut send_failed = false;
        while let Some(frame) = queue.pop_front() {
            if send_frame(&mut sink, &frame).await.is_err() {
                send_failed = true;
                break;
            }
        }
        if send_failed {
            break SessionEnd::Closed;
        }
    };

    // A session that was itself evicted must not release the slot -- the
    // session that evicted it already owns it.
    if !matches!(outcome, SessionEnd::Evicted) {
        registry.release(&identity).await;
    }
}

enum SessionEnd {
    Closed,
    Evicted,
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

fn handle_client_frame(
    text: &str,
    subscriptions: &mut HashSet<EventType>,
    queue: &mut VecDeque<ServerFrame>,
    dropped: &mut u64,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!("ignoring malformed control-plane frame: {err}");
            return;
        }
    };
    match frame {
        ClientFrame::Ping => queue.push_back(ServerFrame::Pong),
        ClientFrame::Subscribe { events } => {
            subscriptions.extend(events);
            queue.push_back(subscription_updated(subscriptions, dropped));
        }
        ClientFrame::Unsubscribe { events } => {
            for event in events {
                subscriptions.remove(&event);
            }
            queue.push_back(subscription_updated(subscriptions, dropped));
        }
        ClientFrame::Stats => {
            queue.push_back(ServerFrame::SubscriptionUpdated {
                subscriptions: subscriptions.iter().copied().collect(),
                dropped: Some(*dropped),
            });
        }
    }
}

fn subscription_updated(subscriptions: &HashSet<EventType>, dropped: &u64) -> ServerFrame {
    ServerFrame::SubscriptionUpdated {
        subscriptions: subscriptions.iter().copied().collect(),
        dropped: Some(*dropped),
    }
}

/// Queue a bus event for delivery, applying the never-drop-critical /
/// drop-oldest-otherwise policy once the queue is at capacity.
fn enqueue_event(
    event: Event,
    subscriptions: &HashSet<EventType>,
    queue_cap: usize,
    queue: &mut VecDeque<ServerFrame>,
    dropped: &mut u64,
    metrics: &MetricsCollection,
) {
    if !subscriptions.contains(&event.event) {
        return;
    }
    let frame = ServerFrame::Event {
        event: event.event,
        data: event.data,
        ts: event.ts,
    };
    if event.event.is_critical() {
        queue.push_back(frame);
        return;
    }
    if queue.len() >= queue_cap {
        if queue.pop_front().is_some() {
            *dropped += 1;
            metrics.inc_ws_events_dropped();
        }
    }
    queue.push_back(frame);
}

/// Resets the connected-sessions gauge back to 0 when a session ends,
/// regardless of which `return` path got there.
struct ConnectedGuard<'a> {
    metrics: &'a MetricsCollection,
}

impl Drop for ConnectedGuard<'_> {
    fn drop(&mut self) {
        self.metrics.set_ws_sessions_connected(0);
    }
}

async fn send_frame(
    sink: &mut (impl futures_util::Sink<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ServerFrame always serializes");
    use futures_util::SinkExt;
    sink.send(Message::Text(text)).await
}

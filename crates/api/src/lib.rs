//! Wire types shared between `dnsctld` and its control-channel clients.
//!
//! These are plain serde structs and hand-written `Display`-only error
//! enums, mirroring how the daemon represents its own internal errors: no
//! HTTP status codes leak in here, and no `thiserror`/`anyhow`.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use domain::base::Name;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

//----------- Zone -------------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneType {
    Master,
    Slave,
    Forward,
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::Forward => "forward",
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ZoneCreate {
    pub name: Name<Bytes>,
    pub zone_type: ZoneType,
    pub email: String,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub masters: Vec<IpAddr>,
    pub forwarders: Vec<IpAddr>,
    pub created_by: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ZoneUpdate {
    pub id: i64,
    pub version: i64,
    pub email: Option<String>,
    pub refresh: Option<u32>,
    pub retry: Option<u32>,
    pub expire: Option<u32>,
    pub minimum: Option<u32>,
    pub masters: Option<Vec<IpAddr>>,
    pub forwarders: Option<Vec<IpAddr>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ZoneView {
    pub id: i64,
    pub name: Name<Bytes>,
    pub zone_type: ZoneType,
    pub email: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub is_active: bool,
    pub masters: Vec<IpAddr>,
    pub forwarders: Vec<IpAddr>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub created_by: String,
}

//----------- Record -----------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
    Ptr,
    Ns,
    Soa,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Cname => "CNAME",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Srv => "SRV",
            Self::Ptr => "PTR",
            Self::Ns => "NS",
            Self::Soa => "SOA",
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RecordCreate {
    pub zone_id: i64,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub weight: Option<u16>,
    pub port: Option<u16>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RecordUpdate {
    pub id: i64,
    pub version: i64,
    pub value: Option<String>,
    pub ttl: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RecordView {
    pub id: i64,
    pub zone_id: i64,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub weight: Option<u16>,
    pub port: Option<u16>,
    pub is_active: bool,
}

//----------- Forwarder ---------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderType {
    ActiveDirectory,
    Intranet,
    Public,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    First,
    Only,
}

impl fmt::Display for ForwardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::Only => "only",
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderServer {
    pub ip: IpAddr,
    pub port: u16,
    pub priority: u8,
    pub weight: u16,
    pub enabled: bool,
    pub last_error: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_s: u32,
    pub timeout_s: u32,
    pub retries: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderCreate {
    pub name: String,
    pub domain: String,
    pub additional_domains: Vec<String>,
    pub forwarder_type: ForwarderType,
    pub servers: Vec<ForwarderServer>,
    pub forward_policy: ForwardPolicy,
    pub health_check: HealthCheckConfig,
    pub priority: u8,
    pub weight: u16,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderUpdate {
    pub id: i64,
    pub version: i64,
    pub servers: Option<Vec<ForwarderServer>>,
    pub forward_policy: Option<ForwardPolicy>,
    pub health_check: Option<HealthCheckConfig>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderView {
    pub id: i64,
    pub name: String,
    pub domain: String,
    pub additional_domains: Vec<String>,
    pub forwarder_type: ForwarderType,
    pub servers: Vec<ForwarderServer>,
    pub forward_policy: ForwardPolicy,
    pub health_check: HealthCheckConfig,
    pub priority: u8,
    pub weight: u16,
    pub is_active: bool,
    pub health_status: HealthStatus,
    pub last_checked_at: Option<Timestamp>,
    pub version: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderTestResult {
    pub server: IpAddr,
    pub ok: bool,
    pub response_ms: Option<u64>,
    pub error: Option<String>,
}

//----------- RPZ ----------------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpzAction {
    Block,
    Redirect,
    Passthru,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    Manual,
    Feed(i64),
    ManualList(i64),
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Feed(id) => write!(f, "feed:{id}"),
            Self::ManualList(id) => write!(f, "manual_list:{id}"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RpzRuleCreate {
    pub domain: String,
    pub rpz_zone: String,
    pub action: RpzAction,
    pub redirect_target: Option<String>,
    pub category: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RpzRuleUpdate {
    pub id: i64,
    pub action: Option<RpzAction>,
    pub redirect_target: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RpzRuleView {
    pub id: i64,
    pub domain: String,
    pub rpz_zone: String,
    pub action: RpzAction,
    pub redirect_target: Option<String>,
    pub category: String,
    pub source: RuleSource,
    pub is_active: bool,
    pub created_at: Timestamp,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RpzDiff {
    pub add: Vec<RpzRuleCreate>,
    pub remove: Vec<(String, String)>,
}

//----------- Threat feeds --------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Hosts,
    Domains,
    Rpz,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Ok,
    Error,
    Never,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ThreatFeedView {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub format: FeedFormat,
    pub category: String,
    pub rpz_zone: String,
    pub update_frequency_s: u32,
    pub enabled: bool,
    pub last_status: FeedStatus,
    pub last_attempt_at: Option<Timestamp>,
    pub last_success_at: Option<Timestamp>,
    pub rule_count: u64,
}

//----------- Events ----------------------------------------------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ZoneCreated,
    ZoneUpdated,
    ZoneDeleted,
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    ForwarderCreated,
    ForwarderUpdated,
    ForwarderDeleted,
    ForwarderStatusChange,
    HealthUpdate,
    HealthAlert,
    SecurityAlert,
    RpzRuleCreated,
    RpzRuleUpdated,
    RpzRuleDeleted,
    ThreatFeedUpdated,
    ThreatFeedError,
    BindReload,
    ConfigChange,
    SystemStatus,
    SessionExpired,
    SubscriptionUpdated,
    ConnectionEstablished,
}

impl EventType {
    /// Events that backpressure handling must never drop (§4.7).
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Self::SecurityAlert | Self::BindReload | Self::ThreatFeedError | Self::SessionExpired
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Event {
    pub event: EventType,
    pub data: serde_json::Value,
    pub ts: Timestamp,
}

/// Frames exchanged over the singleton WebSocket session.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe { events: Vec<EventType> },
    Unsubscribe { events: Vec<EventType> },
    Stats,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong,
    Event {
        event: EventType,
        data: serde_json::Value,
        ts: Timestamp,
    },
    SubscriptionUpdated {
        subscriptions: Vec<EventType>,
        dropped: Option<u64>,
    },
    ConnectionEstablished {
        user_id: String,
        default_subs: Vec<EventType>,
    },
}

//----------- Errors --------------------------------------------------------------

/// Errors raised by `DnsService` (C4) operations.
///
/// Kept as a single flat enum matching the error kinds named in the
/// specification's error-handling design, with hand-written `Display`
/// impls throughout -- no `thiserror`, no `anyhow`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Validation(String),
    Conflict,
    NotFound,
    StoreUnavailable,
    InvariantViolation(String),
    DeployRejected(String),
    DeployFailed(String),
    Internal { correlation_id: String },
}

impl std::error::Error for ServiceError {}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(detail) => write!(f, "validation failed: {detail}"),
            Self::Conflict => f.write_str("optimistic version mismatch"),
            Self::NotFound => f.write_str("no such entity was found"),
            Self::StoreUnavailable => f.write_str("the store is temporarily unavailable"),
            Self::InvariantViolation(detail) => write!(f, "invariant violation: {detail}"),
            Self::DeployRejected(detail) => write!(f, "deploy rejected: {detail}"),
            Self::DeployFailed(detail) => write!(f, "deploy failed: {detail}"),
            Self::Internal { correlation_id } => {
                write!(f, "internal error (correlation id {correlation_id})")
            }
        }
    }
}

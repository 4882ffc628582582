//! Runtime configuration for dnsctld.
//!
//! Configuration is loaded from a TOML file and overridden by a handful of
//! command-line flags, in the same two-layer style used throughout the
//! daemon: a typed, validated [`Config`] is built once at startup and held
//! behind the `Center`, with [`Logger::apply`](crate::log::Logger::apply)
//! the only piece that re-reads it afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

//----------- ConfigValue ----------------------------------------------------

/// A configuration value paired with whether it was set explicitly or is
/// standing in on a built-in default, so a reload can tell the two apart.
#[derive(Clone, Debug)]
pub struct ConfigValue<T> {
    value: T,
    is_default: bool,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            is_default: false,
        }
    }

    pub fn default_value(value: T) -> Self {
        Self {
            value,
            is_default: true,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

impl<T: Serialize> Serialize for ConfigValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ConfigValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ConfigValue::new(T::deserialize(deserializer)?))
    }
}

//----------- Logging ---------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Clone, Debug)]
pub enum LogTarget {
    File(Box<Utf8Path>),
    Syslog,
    Stdout,
    Stderr,
}

impl FromStr for LogTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syslog" => Ok(Self::Syslog),
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            path => Ok(Self::File(Utf8Path::new(path).into())),
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{path}"),
            Self::Syslog => f.write_str("syslog"),
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

impl Serialize for LogTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: ConfigValue<LogLevel>,

    #[serde(default = "default_log_target")]
    pub target: ConfigValue<LogTarget>,

    #[serde(default)]
    pub trace_targets: ConfigValue<Vec<String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            target: default_log_target(),
            trace_targets: ConfigValue::default_value(Vec::new()),
        }
    }
}

fn default_log_level() -> ConfigValue<LogLevel> {
    ConfigValue::default_value(LogLevel::Info)
}

fn default_log_target() -> ConfigValue<LogTarget> {
    ConfigValue::default_value(LogTarget::Stdout)
}

//----------- Daemon ------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Named(String),
    Numeric(u32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupId {
    Named(String),
    Numeric(u32),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Numeric(id) => write!(f, "{id}"),
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Numeric(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub identity: Option<(UserId, GroupId)>,

    #[serde(default)]
    pub chroot: Option<Box<Utf8Path>>,

    #[serde(default)]
    pub pid_file: Option<Box<Utf8Path>>,

    #[serde(default = "default_daemonize")]
    pub daemonize: ConfigValue<bool>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            identity: None,
            chroot: None,
            pid_file: None,
            daemonize: default_daemonize(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_daemonize() -> ConfigValue<bool> {
    ConfigValue::default_value(false)
}

//----------- Alerting -----------------------------------------------------------

/// Thresholds the health monitor (C5) compares samples against before
/// raising `health.alert` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_response_ms_warn")]
    pub response_ms_warn: u32,

    #[serde(default = "default_response_ms_critical")]
    pub response_ms_critical: u32,

    #[serde(default = "default_fail_rate_warn")]
    pub fail_rate_warn: f64,

    #[serde(default = "default_fail_rate_critical")]
    pub fail_rate_critical: f64,

    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_ms_warn: default_response_ms_warn(),
            response_ms_critical: default_response_ms_critical(),
            fail_rate_warn: default_fail_rate_warn(),
            fail_rate_critical: default_fail_rate_critical(),
            consecutive_failures: default_consecutive_failures(),
        }
    }
}

fn default_response_ms_warn() -> u32 {
    200
}
fn default_response_ms_critical() -> u32 {
    1000
}
fn default_fail_rate_warn() -> f64 {
    0.1
}
fn default_fail_rate_critical() -> f64 {
    0.5
}
fn default_consecutive_failures() -> u32 {
    3
}

//----------- Config --------------------------------------------------------------

/// The daemon's top-level configuration, loaded from a TOML file named on
/// the command line (`-c`/`--config`) or found at a default path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Connection string for the [`dnsctl_store::Store`](dnsctl_store::Store), e.g.
    /// `sqlite://dnsctld.db` or `postgres://user@host/dnsctld`.
    pub db_url: String,

    #[serde(default = "default_db_timeout", with = "humantime_secs")]
    pub db_timeout: Duration,

    /// Directory BIND's `named.conf` (and the management-marker block) is
    /// rendered into.
    pub bind_config_dir: Utf8PathBuf,

    /// Directory rendered zone files are written to.
    pub bind_zones_dir: Utf8PathBuf,

    /// Directory rendered RPZ zone files are written to.
    pub bind_rpz_dir: Utf8PathBuf,

    /// Directory pre-deploy configuration snapshots (C9) are archived into.
    pub bind_snapshot_dir: Utf8PathBuf,

    #[serde(default = "default_bind_service_name")]
    pub bind_service_name: String,

    #[serde(default = "default_reload_timeout", with = "humantime_secs")]
    pub reload_timeout: Duration,

    #[serde(default = "default_restart_timeout", with = "humantime_secs")]
    pub restart_timeout: Duration,

    #[serde(
        default = "default_deploy_coalesce_max_wait",
        with = "humantime_secs"
    )]
    pub deploy_coalesce_max_wait: Duration,

    #[serde(default = "default_ws_max_queue")]
    pub ws_max_queue: usize,

    #[serde(default = "default_ws_ping_interval", with = "humantime_secs")]
    pub ws_ping_interval: Duration,

    #[serde(default = "default_feed_http_timeout", with = "humantime_secs")]
    pub feed_http_timeout: Duration,

    #[serde(default)]
    pub alert_thresholds: AlertThresholds,

    #[serde(default = "default_sample_retention_days")]
    pub sample_retention_days: u32,

    #[serde(default = "default_snapshot_retention_count")]
    pub snapshot_retention_count: u32,

    /// Address the control-plane HTTP/WS API listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Bearer tokens accepted by the `/ws` control-plane session, mapped to
    /// the identity they authenticate as. A connection presenting a token
    /// not in this table is refused; the session is then keyed by that
    /// identity rather than a per-connection random id, so only the same
    /// user's reconnect evicts a live session (spec. §4.7, P8).
    #[serde(default)]
    pub auth_tokens: BTreeMap<String, String>,

    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Arbitrary extension keys accepted but not yet interpreted, so that
    /// forward-compatible config files don't fail to parse.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

fn default_db_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_bind_service_name() -> String {
    "named".to_string()
}
fn default_reload_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_restart_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_deploy_coalesce_max_wait() -> Duration {
    Duration::from_millis(500)
}
fn default_ws_max_queue() -> usize {
    256
}
fn default_ws_ping_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_feed_http_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_sample_retention_days() -> u32 {
    30
}
fn default_snapshot_retention_count() -> u32 {
    20
}
fn default_listen() -> String {
    "127.0.0.1:8053".to_string()
}

mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//----------- ConfigError --------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "failed to read config file: {msg}"),
            Self::Parse(msg) => write!(f, "failed to parse config file: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Build the clap command describing dnsctld's command-line flags.
    pub fn setup_cli() -> Command {
        Command::new("dnsctld")
            .about("A control-plane daemon fronting BIND9.")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .default_value("/etc/dnsctld/dnsctld.toml")
                    .help("Path to the TOML configuration file"),
            )
            .arg(
                Arg::new("check-config")
                    .long("check-config")
                    .action(ArgAction::SetTrue)
                    .help("Parse the configuration file and exit"),
            )
    }

    /// Load and validate the configuration named by `matches`.
    pub fn init(matches: &ArgMatches) -> Result<Self, ConfigError> {
        let path = matches
            .get_one::<String>("config")
            .expect("has a default value");

        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    pub fn check_config_only(matches: &ArgMatches) -> bool {
        matches.get_flag("check-config")
    }
}

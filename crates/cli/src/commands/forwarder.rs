use std::net::IpAddr;

use futures_util::TryFutureExt;

use dnsctl_api::{
    ForwardPolicy, ForwarderCreate, ForwarderServer, ForwarderType, ForwarderUpdate, ForwarderView, HealthCheckConfig,
};

use crate::ansi;
use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Forwarder {
    #[command(subcommand)]
    command: ForwarderCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum ForwarderCommand {
    /// List registered forwarders and their health
    #[command(name = "list")]
    List,

    /// Register a new forwarder
    #[command(name = "add")]
    Add {
        name: String,
        #[arg(long)]
        domain: String,
        #[arg(long = "additional-domain")]
        additional_domains: Vec<String>,
        #[arg(long = "type", value_enum)]
        forwarder_type: CliForwarderType,
        /// One or more `ip[:port[:priority[:weight]]]` server specs.
        #[arg(long = "server", value_name = "IP[:PORT[:PRIORITY[:WEIGHT]]]", required = true)]
        servers: Vec<String>,
        #[arg(long = "policy", value_enum, default_value = "first")]
        forward_policy: CliForwardPolicy,
        #[arg(long, default_value_t = 0)]
        priority: u8,
        #[arg(long, default_value_t = 1)]
        weight: u16,
        #[arg(long, default_value_t = true)]
        health_check: bool,
        #[arg(long, default_value_t = 10)]
        health_check_interval_s: u32,
        #[arg(long, default_value_t = 2)]
        health_check_timeout_s: u32,
        #[arg(long, default_value_t = 3)]
        health_check_retries: u32,
    },

    /// Replace a forwarder's server list or forward policy
    #[command(name = "update")]
    Update {
        id: i64,
        #[arg(long)]
        version: i64,
        #[arg(long = "server", value_name = "IP[:PORT[:PRIORITY[:WEIGHT]]]")]
        servers: Vec<String>,
        #[arg(long = "policy", value_enum)]
        forward_policy: Option<CliForwardPolicy>,
    },

    /// Remove a forwarder
    #[command(name = "remove")]
    Remove { id: i64 },

    /// Enable or disable a forwarder
    #[command(name = "toggle")]
    Toggle {
        id: i64,
        #[arg(long)]
        version: i64,
        #[arg(long)]
        active: bool,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliForwarderType {
    ActiveDirectory,
    Intranet,
    Public,
}

impl From<CliForwarderType> for ForwarderType {
    fn from(value: CliForwarderType) -> Self {
        match value {
            CliForwarderType::ActiveDirectory => Self::ActiveDirectory,
            CliForwarderType::Intranet => Self::Intranet,
            CliForwarderType::Public => Self::Public,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliForwardPolicy {
    First,
    Only,
}

impl From<CliForwardPolicy> for ForwardPolicy {
    fn from(value: CliForwardPolicy) -> Self {
        match value {
            CliForwardPolicy::First => Self::First,
            CliForwardPolicy::Only => Self::Only,
        }
    }
}

fn parse_server(spec: &str) -> Result<ForwarderServer, String> {
    let mut parts = spec.split(':');
    let ip: IpAddr = parts
        .next()
        .ok_or_else(|| "empty server spec".to_string())?
        .parse()
        .map_err(|e| format!("invalid server address '{spec}': {e}"))?;
    let port: u16 = match parts.next() {
        Some(p) => p.parse().map_err(|e| format!("invalid port in '{spec}': {e}"))?,
        None => 53,
    };
    let priority: u8 = match parts.next() {
        Some(p) => p.parse().map_err(|e| format!("invalid priority in '{spec}': {e}"))?,
        None => 0,
    };
    let weight: u16 = match parts.next() {
        Some(w) => w.parse().map_err(|e| format!("invalid weight in '{spec}': {e}"))?,
        None => 1,
    };
    Ok(ForwarderServer {
        ip,
        port,
        priority,
        weight,
        enabled: true,
        last_error: None,
    })
}

impl Forwarder {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            ForwarderCommand::List => {
                let forwarders: Vec<ForwarderView> = client
                    .get("/forwarders")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("{:<4} {:<20} {:<24} {:<10} active", "id", "name", "domain", "health");
                for fwd in forwarders {
                    let color = match fwd.health_status {
                        dnsctl_api::HealthStatus::Healthy => ansi::GREEN,
                        dnsctl_api::HealthStatus::Degraded => ansi::YELLOW,
                        dnsctl_api::HealthStatus::Unhealthy => ansi::RED,
                        dnsctl_api::HealthStatus::Unknown => ansi::GRAY,
                    };
                    println!(
                        "{:<4} {:<20} {:<24} {color}{:<10}{} {}",
                        fwd.id,
                        fwd.name,
                        fwd.domain,
                        fwd.health_status,
                        ansi::RESET,
                        fwd.is_active
                    );
                }
                Ok(())
            }
            ForwarderCommand::Add {
                name,
                domain,
                additional_domains,
                forwarder_type,
                servers,
                forward_policy,
                priority,
                weight,
                health_check,
                health_check_interval_s,
                health_check_timeout_s,
                health_check_retries,
            } => {
                let servers = servers.iter().map(|s| parse_server(s)).collect::<Result<Vec<_>, _>>()?;

                let forwarder: ForwarderView = client
                    .post("/forwarders")
                    .json(&ForwarderCreate {
                        name,
                        domain,
                        additional_domains,
                        forwarder_type: forwarder_type.into(),
                        servers,
                        forward_policy: forward_policy.into(),
                        health_check: HealthCheckConfig {
                            enabled: health_check,
                            interval_s: health_check_interval_s,
                            timeout_s: health_check_timeout_s,
                            retries: health_check_retries,
                        },
                        priority,
                        weight,
                    })
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("added forwarder {} (id {})", forwarder.name, forwarder.id);
                Ok(())
            }
            ForwarderCommand::Update {
                id,
                version,
                servers,
                forward_policy,
            } => {
                let servers = if servers.is_empty() {
                    None
                } else {
                    Some(servers.iter().map(|s| parse_server(s)).collect::<Result<Vec<_>, _>>()?)
                };

                client
                    .put(&format!("/forwarders/{id}"))
                    .json(&ForwarderUpdate {
                        id,
                        version,
                        servers,
                        forward_policy: forward_policy.map(Into::into),
                        health_check: None,
                        is_active: None,
                    })
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("updated forwarder {id}");
                Ok(())
            }
            ForwarderCommand::Remove { id } => {
                client
                    .delete(&format!("/forwarders/{id}"))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("removed forwarder {id}");
                Ok(())
            }
            ForwarderCommand::Toggle { id, version, active } => {
                client
                    .post(&format!("/forwarders/{id}/toggle"))
                    .json(&serde_json::json!({ "version": version, "active": active }))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("forwarder {id} is now {}", if active { "active" } else { "inactive" });
                Ok(())
            }
        }
    }
}


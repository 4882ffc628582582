use std::net::IpAddr;

use bytes::Bytes;
use domain::base::Name;
use futures_util::TryFutureExt;

use dnsctl_api::{ZoneCreate, ZoneType, ZoneUpdate, ZoneView};

use crate::ansi;
use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Zone {
    #[command(subcommand)]
    command: ZoneCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum ZoneCommand {
    /// List registered zones
    #[command(name = "list")]
    List,

    /// Register a new zone
    #[command(name = "add")]
    Add {
        name: Name<Bytes>,
        #[arg(long = "type", value_enum)]
        zone_type: CliZoneType,
        #[arg(long = "email")]
        email: String,
        #[arg(long = "master", value_name = "IP")]
        masters: Vec<IpAddr>,
        #[arg(long = "forwarder", value_name = "IP")]
        forwarders: Vec<IpAddr>,
        #[arg(long, default_value_t = 3600)]
        refresh: u32,
        #[arg(long, default_value_t = 900)]
        retry: u32,
        #[arg(long, default_value_t = 604800)]
        expire: u32,
        #[arg(long, default_value_t = 3600)]
        minimum: u32,
    },

    /// Update an existing zone's mutable fields
    #[command(name = "update")]
    Update {
        id: i64,
        #[arg(long)]
        version: i64,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        refresh: Option<u32>,
        #[arg(long)]
        retry: Option<u32>,
        #[arg(long)]
        expire: Option<u32>,
        #[arg(long)]
        minimum: Option<u32>,
        #[arg(long = "master", value_name = "IP")]
        masters: Option<Vec<IpAddr>>,
        #[arg(long = "forwarder", value_name = "IP")]
        forwarders: Option<Vec<IpAddr>>,
    },

    /// Remove a zone
    #[command(name = "remove")]
    Remove { id: i64 },

    /// Enable or disable a zone
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
pub enum CliZoneType {
    Master,
    Slave,
    Forward,
}

impl From<CliZoneType> for ZoneType {
    fn from(value: CliZoneType) -> Self {
        match value {
            CliZoneType::Master => Self::Master,
            CliZoneType::Slave => Self::Slave,
            CliZoneType::Forward => Self::Forward,
        }
    }
}

impl Zone {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            ZoneCommand::List => {
                let zones: Vec<ZoneView> = client
                    .get("/zones")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("{:<4} {:<24} {:<8} {:>10} active", "id", "name", "type", "serial");
                for zone in zones {
                    let (color, label) = if zone.is_active {
                        (ansi::GREEN, "yes")
                    } else {
                        (ansi::GRAY, "no")
                    };
                    println!(
                        "{:<4} {:<24} {:<8} {:>10} {color}{label}{}",
                        zone.id, zone.name, zone.zone_type, zone.serial, ansi::RESET
                    );
                }
                Ok(())
            }
            ZoneCommand::Add {
                name,
                zone_type,
                email,
                masters,
                forwarders,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                let zone: ZoneView = client
                    .post("/zones")
                    .json(&ZoneCreate {
                        name,
                        zone_type: zone_type.into(),
                        email,
                        refresh,
                        retry,
                        expire,
                        minimum,
                        masters,
                        forwarders,
                        created_by: "dnsctl".to_string(),
                    })
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("added zone {} (id {})", zone.name, zone.id);
                Ok(())
            }
            ZoneCommand::Update {
                id,
                version,
                email,
                refresh,
                retry,
                expire,
                minimum,
                masters,
                forwarders,
            } => {
                client
                    .put(&format!("/zones/{id}"))
                    .json(&ZoneUpdate {
                        id,
                        version,
                        email,
                        refresh,
                        retry,
                        expire,
                        minimum,
                        masters,
                        forwarders,
                    })
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("updated zone {id}");
                Ok(())
            }
            ZoneCommand::Remove { id } => {
                client
                    .delete(&format!("/zones/{id}"))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("removed zone {id}");
                Ok(())
            }
            ZoneCommand::Toggle { id, version, active } => {
                client
                    .post(&format!("/zones/{id}/toggle"))
                    .json(&serde_json::json!({ "version": version, "active": active }))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("zone {id} is now {}", if active { "active" } else { "inactive" });
                Ok(())
            }
        }
    }
}

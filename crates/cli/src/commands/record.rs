use futures_util::TryFutureExt;

use dnsctl_api::{RecordCreate, RecordType, RecordUpdate, RecordView};

use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Record {
    #[command(subcommand)]
    command: RecordCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum RecordCommand {
    /// Add a record to a zone
    #[command(name = "add")]
    Add {
        #[arg(long = "zone")]
        zone_id: i64,
        name: String,
        #[arg(long = "type", value_enum)]
        record_type: CliRecordType,
        value: String,
        #[arg(long, default_value_t = 3600)]
        ttl: u32,
        #[arg(long)]
        priority: Option<u16>,
        #[arg(long)]
        weight: Option<u16>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Update a record's value, TTL, or active flag
    #[command(name = "update")]
    Update {
        id: i64,
        #[arg(long)]
        version: i64,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        ttl: Option<u32>,
        #[arg(long)]
        active: Option<bool>,
    },

    /// Remove a record
    #[command(name = "remove")]
    Remove { id: i64 },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliRecordType {
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

impl From<CliRecordType> for RecordType {
    fn from(value: CliRecordType) -> Self {
        match value {
            CliRecordType::A => Self::A,
            CliRecordType::Aaaa => Self::Aaaa,
            CliRecordType::Cname => Self::Cname,
            CliRecordType::Mx => Self::Mx,
            CliRecordType::Txt => Self::Txt,
            CliRecordType::Srv => Self::Srv,
            CliRecordType::Ptr => Self::Ptr,
            CliRecordType::Ns => Self::Ns,
            CliRecordType::Soa => Self::Soa,
        }
    }
}

impl Record {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            RecordCommand::Add {
                zone_id,
                name,
                record_type,
                value,
                ttl,
                priority,
                weight,
                port,
            } => {
                let record: RecordView = client
                    .post("/records")
                    .json(&RecordCreate {
                        zone_id,
                        name,
                        record_type: record_type.into(),
                        value,
                        ttl,
                        priority,
                        weight,
                        port,
                    })
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("added record {} (id {})", record.name, record.id);
                Ok(())
            }
            RecordCommand::Update {
                id,
                version,
                value,
                ttl,
                active,
            } => {
                client
                    .put(&format!("/records/{id}"))
                    .json(&RecordUpdate {
                        id,
                        version,
                        value,
                        ttl,
                        is_active: active,
                    })
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("updated record {id}");
                Ok(())
            }
            RecordCommand::Remove { id } => {
                client
                    .delete(&format!("/records/{id}"))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("removed record {id}");
                Ok(())
            }
        }
    }
}

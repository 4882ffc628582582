//! The commands of `dnsctl`.

pub mod audit;
pub mod deploy;
pub mod forwarder;
pub mod record;
pub mod rpz;
pub mod status;
pub mod zone;

use crate::client::DnsctlApiClient;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Get the status of the daemon
    #[command(name = "status")]
    Status(self::status::Status),

    /// Manage zones
    #[command(name = "zone")]
    Zone(self::zone::Zone),

    /// Manage records within a zone
    #[command(name = "record")]
    Record(self::record::Record),

    /// Manage upstream forwarders
    #[command(name = "forwarder")]
    Forwarder(self::forwarder::Forwarder),

    /// Manage response-policy zone rules
    #[command(name = "rpz")]
    Rpz(self::rpz::Rpz),

    /// Trigger an immediate BIND deploy
    #[command(name = "deploy")]
    Deploy(self::deploy::Deploy),

    /// Inspect and roll back to prior configuration snapshots
    #[command(name = "audit")]
    Audit(self::audit::Audit),
}

impl Command {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self {
            Self::Status(status) => status.execute(client).await,
            Self::Zone(zone) => zone.execute(client).await,
            Self::Record(record) => record.execute(client).await,
            Self::Forwarder(forwarder) => forwarder.execute(client).await,
            Self::Rpz(rpz) => rpz.execute(client).await,
            Self::Deploy(deploy) => deploy.execute(client).await,
            Self::Audit(audit) => audit.execute(client).await,
        }
    }
}

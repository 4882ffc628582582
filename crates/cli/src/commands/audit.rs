use futures_util::TryFutureExt;
use serde::Deserialize;

use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Audit {
    #[command(subcommand)]
    command: AuditCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum AuditCommand {
    /// List retained configuration snapshots
    #[command(name = "snapshots")]
    Snapshots,

    /// Roll the bind configuration back to a prior snapshot and redeploy
    #[command(name = "rollback")]
    Rollback { id: i64 },
}

#[derive(Deserialize)]
struct SnapshotView {
    id: i64,
    content_hash: String,
    ts: jiff::Timestamp,
    source_action: String,
}

impl Audit {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            AuditCommand::Snapshots => {
                let snapshots: Vec<SnapshotView> = client
                    .get("/audit/snapshots")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("{:<4} {:<20} {:<16} action", "id", "taken at", "hash");
                for snapshot in snapshots {
                    println!(
                        "{:<4} {:<20} {:<16} {}",
                        snapshot.id,
                        snapshot.ts.round(jiff::Unit::Second).unwrap_or(snapshot.ts),
                        &snapshot.content_hash[..snapshot.content_hash.len().min(16)],
                        snapshot.source_action
                    );
                }
                Ok(())
            }
            AuditCommand::Rollback { id } => {
                client
                    .post(&format!("/audit/rollback/{id}"))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("rolled back to snapshot {id}");
                Ok(())
            }
        }
    }
}

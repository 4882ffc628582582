use futures_util::TryFutureExt;

use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Deploy {
    #[command(subcommand)]
    command: Option<DeployCommand>,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum DeployCommand {
    /// Trigger an immediate deploy, bypassing the coalescing window
    #[command(name = "now")]
    Now,
}

impl Deploy {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            Some(DeployCommand::Now) | None => {
                client
                    .post("/deploy")
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("deploy requested");
                Ok(())
            }
        }
    }
}

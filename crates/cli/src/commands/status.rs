use futures_util::TryFutureExt;
use serde::Deserialize;

use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Status {
    #[command(subcommand)]
    command: Option<StatusCommand>,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum StatusCommand {
    /// Print the daemon's raw Prometheus/OpenMetrics scrape
    #[command(name = "metrics")]
    Metrics,
}

#[derive(Deserialize)]
struct StatusView {
    zones: usize,
    forwarders: usize,
    rpz_rules: usize,
}

impl Status {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            Some(StatusCommand::Metrics) => {
                let text = client
                    .get("/metrics")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.text())
                    .await
                    .map_err(format_http_error)?;
                print!("{text}");
                Ok(())
            }
            None => {
                let response: StatusView = client
                    .get("/status")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("zones:       {}", response.zones);
                println!("forwarders:  {}", response.forwarders);
                println!("rpz rules:   {}", response.rpz_rules);
                Ok(())
            }
        }
    }
}

use futures_util::TryFutureExt;

use dnsctl_api::{RpzAction, RpzRuleCreate, RpzRuleUpdate, RpzRuleView};

use crate::client::{check_status, format_http_error, DnsctlApiClient};
use crate::println;

#[derive(Clone, Debug, clap::Args)]
pub struct Rpz {
    #[command(subcommand)]
    command: RpzCommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum RpzCommand {
    /// List active RPZ rules
    #[command(name = "list")]
    List,

    /// Add a manual block/redirect/passthru rule
    #[command(name = "add")]
    Add {
        domain: String,
        #[arg(long = "zone")]
        rpz_zone: String,
        #[arg(long, value_enum)]
        action: CliRpzAction,
        #[arg(long)]
        redirect_target: Option<String>,
        #[arg(long, default_value = "manual")]
        category: String,
    },

    /// Change a rule's action or active flag
    #[command(name = "update")]
    Update {
        id: i64,
        #[arg(long, value_enum)]
        action: Option<CliRpzAction>,
        #[arg(long)]
        redirect_target: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },

    /// Remove a rule
    #[command(name = "remove")]
    Remove { id: i64 },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliRpzAction {
    Block,
    Redirect,
    Passthru,
}

impl From<CliRpzAction> for RpzAction {
    fn from(value: CliRpzAction) -> Self {
        match value {
            CliRpzAction::Block => Self::Block,
            CliRpzAction::Redirect => Self::Redirect,
            CliRpzAction::Passthru => Self::Passthru,
        }
    }
}

impl Rpz {
    pub async fn execute(self, client: DnsctlApiClient) -> Result<(), String> {
        match self.command {
            RpzCommand::List => {
                let rules: Vec<RpzRuleView> = client
                    .get("/rpz/rules")
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("{:<4} {:<32} {:<10} {:<12} {:<16} source", "id", "domain", "action", "category", "zone");
                for rule in rules {
                    println!(
                        "{:<4} {:<32} {:<10} {:<12} {:<16} {}",
                        rule.id,
                        rule.domain,
                        format!("{:?}", rule.action).to_lowercase(),
                        rule.category,
                        rule.rpz_zone,
                        rule.source
                    );
                }
                Ok(())
            }
            RpzCommand::Add {
                domain,
                rpz_zone,
                action,
                redirect_target,
                category,
            } => {
                let rule: RpzRuleView = client
                    .post("/rpz/rules")
                    .json(&RpzRuleCreate {
                        domain,
                        rpz_zone,
                        action: action.into(),
                        redirect_target,
                        category,
                    })
                    .send()
                    .and_then(check_status)
                    .and_then(|r| r.json())
                    .await
                    .map_err(format_http_error)?;

                println!("added rule for {} (id {})", rule.domain, rule.id);
                Ok(())
            }
            RpzCommand::Update {
                id,
                action,
                redirect_target,
                active,
            } => {
                client
                    .put(&format!("/rpz/rules/{id}"))
                    .json(&RpzRuleUpdate {
                        id,
                        action: action.map(Into::into),
                        redirect_target,
                        is_active: active,
                    })
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("updated rule {id}");
                Ok(())
            }
            RpzCommand::Remove { id } => {
                client
                    .delete(&format!("/rpz/rules/{id}"))
                    .send()
                    .and_then(check_status)
                    .await
                    .map_err(format_http_error)?;
                println!("removed rule {id}");
                Ok(())
            }
        }
    }
}

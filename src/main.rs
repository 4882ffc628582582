use std::process::ExitCode;
use std::sync::Arc;

use dnsctld::center::Center;
use dnsctld::comms::ApplicationCommand;
use dnsctld::config::Config;
use dnsctld::manager;
use tokio::sync::{broadcast, mpsc};

/// How many events the bus buffers per subscriber before a slow WS session
/// starts lagging (spec. §4.7); with a single control-plane session this is
/// generous headroom rather than a tuned value.
const EVENT_BUS_CAPACITY: usize = 1024;

fn main() -> ExitCode {
    let cmd = Config::setup_cli();
    let matches = cmd.get_matches();

    let config = match Config::init(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dnsctld couldn't be configured: {err}");
            return ExitCode::FAILURE;
        }
    };

    if Config::check_config_only(&matches) {
        return ExitCode::SUCCESS;
    }

    let logger = match dnsctld::log::Logger::launch(&config.daemon.logging) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = dnsctld::daemon::daemonize(&config.daemon) {
        tracing::error!("failed to daemonize: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("couldn't start the Tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config, logger))
}

async fn run(config: Config, logger: &'static dnsctld::log::Logger) -> ExitCode {
    let store = match dnsctl_store::Store::connect(&config.db_url, config.db_timeout).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!("failed to connect to the store: {err}");
            return ExitCode::FAILURE;
        }
    };

    let (event_tx, _event_rx) = broadcast::channel(EVENT_BUS_CAPACITY);
    let (deploy_tx, deploy_rx) = mpsc::unbounded_channel();
    let (app_cmd_tx, mut app_cmd_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let center = Arc::new(Center::new(
        store, config, logger, event_tx, deploy_tx, deploy_rx, app_cmd_tx, update_tx,
    ));

    let mut unit_tx_slots = foldhash::HashMap::default();
    if let Err(err) = manager::spawn(&center, update_rx, &mut unit_tx_slots).await {
        tracing::error!("failed to spawn units: {err}");
        return ExitCode::FAILURE;
    }

    dnsctld::service::reconcile_on_startup(&center).await;

    let result = loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::error!("listening for CTRL-C (SIGINT) failed: {err}");
                    break ExitCode::FAILURE;
                }
                break ExitCode::SUCCESS;
            }
            _ = manager::forward_app_cmds(&mut app_cmd_rx, &unit_tx_slots) => {}
        }
    };

    tracing::info!("shutting down");
    for (name, tx) in &unit_tx_slots {
        if tx.send(ApplicationCommand::Terminate).is_ok() {
            tx.closed().await;
        }
        tracing::debug!("unit '{name}' terminated");
    }

    result
}

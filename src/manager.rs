//! Spawning and coordinating the daemon's units.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::center::{Center, Update};
use crate::comms::{ApplicationCommand, Terminated};
use crate::units::{bind::BindUnit, feed::FeedUnit, health::HealthUnit, http_server::HttpServerUnit, scheduler::SchedulerUnit};

#[derive(Debug)]
pub enum Error {
    Terminated,
}

impl From<Terminated> for Error {
    fn from(_: Terminated) -> Self {
        Error::Terminated
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_: oneshot::error::RecvError) -> Self {
        Error::Terminated
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Terminated => Terminated.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

/// Spawn the central command and every unit, returning once all units have
/// signaled readiness.
pub async fn spawn(
    center: &Arc<Center>,
    update_rx: mpsc::UnboundedReceiver<Update>,
    unit_tx_slots: &mut foldhash::HashMap<String, mpsc::UnboundedSender<ApplicationCommand>>,
) -> Result<(), Error> {
    info!("Starting central command");
    tokio::spawn(crate::center::run_central_command(
        center.clone(),
        update_rx,
    ));

    let mut unit_ready_rxs = Vec::new();

    info!("Starting unit 'bind'");
    let unit = BindUnit::new(center.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    unit_ready_rxs.push(ready_rx);
    tokio::spawn(unit.run(cmd_rx, ready_tx));
    unit_tx_slots.insert("bind".into(), cmd_tx);

    info!("Starting unit 'health'");
    let unit = HealthUnit::new(center.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    unit_ready_rxs.push(ready_rx);
    tokio::spawn(unit.run(cmd_rx, ready_tx));
    unit_tx_slots.insert("health".into(), cmd_tx);

    info!("Starting unit 'feed'");
    let unit = FeedUnit::new(center.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    unit_ready_rxs.push(ready_rx);
    tokio::spawn(unit.run(cmd_rx, ready_tx));
    unit_tx_slots.insert("feed".into(), cmd_tx);

    info!("Starting unit 'scheduler'");
    let unit = SchedulerUnit::new(center.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    unit_ready_rxs.push(ready_rx);
    tokio::spawn(unit.run(cmd_rx, ready_tx));
    unit_tx_slots.insert("scheduler".into(), cmd_tx);

    info!("Starting unit 'http'");
    let unit = HttpServerUnit::new(center.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    unit_ready_rxs.push(ready_rx);
    tokio::spawn(unit.run(cmd_rx, ready_tx));
    unit_tx_slots.insert("http".into(), cmd_tx);

    for ready_rx in unit_ready_rxs {
        ready_rx.await?;
    }

    info!("All units report ready.");
    Ok(())
}

/// Forward application commands addressed to a named unit.
pub async fn forward_app_cmds(
    rx: &mut mpsc::UnboundedReceiver<(String, ApplicationCommand)>,
    unit_txs: &foldhash::HashMap<String, mpsc::UnboundedSender<ApplicationCommand>>,
) {
    while let Some((unit_name, cmd)) = rx.recv().await {
        if let Some(tx) = unit_txs.get(&*unit_name) {
            debug!("Forwarding {cmd} to unit '{unit_name}'");
            let _ = tx.send(cmd);
        } else {
            debug!("Unrecognized unit: {unit_name}");
        }
    }
}

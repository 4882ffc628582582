//! The scheduler unit: wakes on its own short tick, asks `Schedule` what's
//! due, and runs it (spec. §4.8).

use std::sync::Arc;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::center::Center;
use crate::comms::ApplicationCommand;
use crate::scheduler::{Schedule, TaskKind};
use crate::units::feed::FeedUnit;
use crate::units::health::HealthUnit;

/// Upper bound on how long a task is allowed to run before the unit logs a
/// warning; there is no hard deadline enforcement, just visibility.
const OVERRUN_WARN: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SchedulerUnit {
    center: Arc<Center>,
    health: HealthUnit,
    feed: FeedUnit,
}

impl SchedulerUnit {
    pub fn new(center: Arc<Center>) -> Self {
        let health = HealthUnit::new(center.clone());
        let feed = FeedUnit::new(center.clone());
        Self { center, health, feed }
    }

    pub async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<ApplicationCommand>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let _ = ready_tx.send(());
        info!("scheduler unit ready");

        let schedule = Arc::new(Mutex::new(Schedule::new(Instant::now())));

        loop {
            let wait = schedule
                .lock()
                .await
                .next_wait(Instant::now())
                .min(Duration::from_secs(60));
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(ApplicationCommand::Terminate) | None => {
                        info!("scheduler unit terminating");
                        return;
                    }
                    Some(ApplicationCommand::Reconfigure) => debug!("scheduler unit reconfigured"),
                },
                _ = tokio::time::sleep(wait) => {
                    let due = schedule.lock().await.due(Instant::now());
                    for task in due {
                        // Each task runs on its own spawned task so one run
                        // overrunning its period doesn't delay polling for
                        // due-ness of the others, and can itself be found
                        // still leased (and skipped) on the next tick.
                        let unit = self.clone();
                        let schedule = schedule.clone();
                        tokio::spawn(async move {
                            let started = Instant::now();
                            if let Err(err) = unit.run_task(task).await {
                                error!("scheduled task '{task}' failed: {err}");
                            }
                            let elapsed = started.elapsed();
                            if elapsed > OVERRUN_WARN {
                                warn!("scheduled task '{task}' took {elapsed:?}, longer than expected");
                            }
                            let overruns = schedule.lock().await.finish(task);
                            if overruns > 0 {
                                warn!("scheduled task '{task}' has skipped {overruns} overlapping fire(s) so far");
                            }
                        });
                    }
                }
            }
        }
    }

    async fn run_task(&self, task: TaskKind) -> Result<(), String> {
        match task {
            TaskKind::CompactHealthSamples => {
                let cutoff_secs =
                    Timestamp::now().as_second() - self.center.config.sample_retention_days as i64 * 86_400;
                let cutoff = Timestamp::from_second(cutoff_secs).unwrap_or(Timestamp::UNIX_EPOCH);
                let mut tx = self.center.store.begin().await.map_err(|e| e.to_string())?;
                let removed = dnsctl_store::compact_health_samples(&mut tx, cutoff)
                    .await
                    .map_err(|e| e.to_string())?;
                tx.commit().await.map_err(|e| e.to_string())?;
                if removed > 0 {
                    debug!("compacted {removed} health samples older than {cutoff}");
                }
            }
            TaskKind::PruneSnapshots => {
                let pruned = crate::audit::prune_stale_snapshots(&self.center)
                    .await
                    .map_err(|e| e.to_string())?;
                if pruned > 0 {
                    debug!("pruned {pruned} stale config snapshots");
                }
            }
            TaskKind::ForwarderHealthPoll => {
                self.health.probe_due_round().await.map_err(|e| e.to_string())?;
            }
            TaskKind::ThreatFeedPoll => {
                self.feed.run_due_round().await.map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}

//! The periodic-task scheduler (C8): a single min-heap of due background
//! jobs -- health-sample compaction, snapshot pruning, and the C5/C6
//! polling rounds -- each on its own period, driven by one ticker rather
//! than one `tokio::time::interval` per job.
//!
//! Each task is leased while it runs: if its next deadline arrives before
//! the previous run finished, the overdue fire is skipped (not queued up
//! behind it) and an overrun counter is bumped so the unit can warn once
//! instead of falling permanently behind.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use foldhash::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CompactHealthSamples,
    PruneSnapshots,
    /// Drives C5: probe every forwarder whose own `health_check.interval_s`
    /// has elapsed. Fixed short period; the per-forwarder interval is
    /// enforced inside the health unit itself.
    ForwarderHealthPoll,
    /// Drives C6: check every threat feed's own due-ness window. Fixed
    /// short period; per-feed `update_frequency_s`/backoff is enforced
    /// inside the feed unit itself.
    ThreatFeedPoll,
}

impl TaskKind {
    pub fn period(self) -> Duration {
        match self {
            // Health samples are high-volume; compact hourly so the table
            // doesn't grow unbounded between the daily snapshot prune.
            Self::CompactHealthSamples => Duration::from_secs(60 * 60),
            Self::PruneSnapshots => Duration::from_secs(24 * 60 * 60),
            // Fine-grained enough that a forwarder with interval_s=30 (the
            // spec's floor) is polled within a few seconds of becoming due.
            Self::ForwarderHealthPoll => Duration::from_secs(5),
            Self::ThreatFeedPoll => Duration::from_secs(5),
        }
    }

    pub const ALL: [TaskKind; 4] = [
        Self::CompactHealthSamples,
        Self::PruneSnapshots,
        Self::ForwarderHealthPoll,
        Self::ThreatFeedPoll,
    ];
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CompactHealthSamples => "compact health samples",
            Self::PruneSnapshots => "prune config snapshots",
            Self::ForwarderHealthPoll => "poll forwarder health",
            Self::ThreatFeedPoll => "poll threat feeds",
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct DueTask {
    at: Instant,
    kind: TaskKind,
}

impl PartialEq for DueTask {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for DueTask {}

impl PartialOrd for DueTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap`, a max-heap, pops the earliest deadline.
        other.at.cmp(&self.at)
    }
}

/// A heap of due tasks, plus a lease per [`TaskKind`] tracking whether a
/// run is still in flight and how many times it has overrun its own
/// period. A missed deadline (the daemon was asleep, or a run overran) is
/// caught up on the next `due()` poll rather than firing twice back to
/// back -- `due()` reschedules from `now`, not from the missed `at`.
pub struct Schedule {
    heap: BinaryHeap<DueTask>,
    leased: HashMap<TaskKind, bool>,
    overruns: HashMap<TaskKind, u32>,
}

impl Schedule {
    pub fn new(now: Instant) -> Self {
        let mut heap = BinaryHeap::new();
        for kind in TaskKind::ALL {
            heap.push(DueTask { at: now + kind.period(), kind });
        }
        Self {
            heap,
            leased: HashMap::default(),
            overruns: HashMap::default(),
        }
    }

    /// Pop every task due at or before `now`, rescheduling each for its
    /// next period measured from `now`. A task still leased (its previous
    /// run hasn't called [`Schedule::finish`] yet) is rescheduled but not
    /// returned as due, and its overrun counter is bumped.
    pub fn due(&mut self, now: Instant) -> Vec<TaskKind> {
        let mut due = Vec::new();
        while let Some(task) = self.heap.peek() {
            if task.at > now {
                break;
            }
            let task = self.heap.pop().expect("just peeked Some");
            self.heap.push(DueTask {
                at: now + task.kind.period(),
                kind: task.kind,
            });

            if *self.leased.get(&task.kind).unwrap_or(&false) {
                *self.overruns.entry(task.kind).or_insert(0) += 1;
                continue;
            }
            self.leased.insert(task.kind, true);
            due.push(task.kind);
        }
        due
    }

    /// Release the lease taken by [`Schedule::due`] once a task's run
    /// completes, and return its current overrun count.
    pub fn finish(&mut self, kind: TaskKind) -> u32 {
        self.leased.insert(kind, false);
        *self.overruns.get(&kind).unwrap_or(&0)
    }

    /// How long until the next task is due, for sizing the ticker's sleep.
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.heap
            .peek()
            .map(|task| task.at.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_due_immediately_after_construction() {
        let now = Instant::now();
        let mut schedule = Schedule::new(now);
        assert!(schedule.due(now).is_empty());
    }

    #[test]
    fn a_task_fires_once_its_period_elapses_and_reschedules() {
        let now = Instant::now();
        let mut schedule = Schedule::new(now);
        let later = now + TaskKind::CompactHealthSamples.period();
        let due = schedule.due(later);
        assert!(due.contains(&TaskKind::CompactHealthSamples));
        schedule.finish(TaskKind::CompactHealthSamples);
        // rescheduled, so an immediate re-poll finds nothing due
        assert!(schedule.due(later).is_empty());
    }

    #[test]
    fn overlapping_fire_is_skipped_and_counted_as_overrun() {
        let now = Instant::now();
        let mut schedule = Schedule::new(now);
        let first = now + TaskKind::ForwarderHealthPoll.period();
        let due = schedule.due(first);
        assert!(due.contains(&TaskKind::ForwarderHealthPoll));
        // task still leased (never called finish) when its next period fires
        let second = first + TaskKind::ForwarderHealthPoll.period();
        let due_again = schedule.due(second);
        assert!(!due_again.contains(&TaskKind::ForwarderHealthPoll));
        assert_eq!(schedule.finish(TaskKind::ForwarderHealthPoll), 1);
    }
}

//! Periodic scheduling task and scheduler record sweep.
//!
//! Every tick scans units that lack deployments and starts a placement
//! round for each one that has no live scheduler record. A separate
//! sweep removes records that can no longer hand out work.

use std::time::Duration;

use fleet_placement::OffsetPolicy;
use fleet_state::StateStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerResult;
use crate::unit::{ScheduleOutcome, schedule};

/// Shortest period the loops accept; `tokio::time::interval` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Counters from one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Units that needed more deployments.
    pub pending: u32,
    pub scheduled: u32,
    /// Units skipped because a round is live or their definition is invalid.
    pub skipped: u32,
    pub no_nodes: u32,
}

pub struct SchedulingTask {
    state: StateStore,
    policy: OffsetPolicy,
}

impl SchedulingTask {
    pub fn new(state: StateStore, policy: OffsetPolicy) -> Self {
        Self { state, policy }
    }

    /// Run one scheduling pass over all units.
    ///
    /// Invalid unit definitions are logged and skipped. Any other error
    /// ends the pass; units not reached yet are picked up next tick.
    pub fn run_once(&self) -> SchedulerResult<TickReport> {
        let mut report = TickReport::default();

        for unit in self.state.list_units()? {
            if !unit.kind.is_schedulable() || unit.missing() == 0 {
                continue;
            }
            report.pending += 1;

            match schedule(&self.state, &unit, &self.policy) {
                Ok(Some(ScheduleOutcome::Scheduled { .. })) => report.scheduled += 1,
                Ok(Some(ScheduleOutcome::NoNodes { .. })) => report.no_nodes += 1,
                Ok(Some(ScheduleOutcome::Duplicate)) | Ok(None) => report.skipped += 1,
                Err(e) if e.is_validation() => {
                    warn!(pod = %unit.pod, unit = %unit.id, error = %e, "skipping invalid unit");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            pending = report.pending,
            scheduled = report.scheduled,
            skipped = report.skipped,
            no_nodes = report.no_nodes,
            "scheduling pass complete"
        );
        Ok(report)
    }

    /// Delete scheduler records that are exhausted or hold no tickets.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self) -> SchedulerResult<u32> {
        let mut removed = 0;
        for record in self.state.list_schedulers()? {
            let exhausted = record.is_exhausted();
            if !exhausted && record.ticket_count() > 0 {
                continue;
            }
            if self.state.delete_scheduler(&record.id)? {
                info!(
                    pod = %record.id.pod,
                    unit = %record.id.unit,
                    consumed = record.consumed,
                    count = record.count,
                    exhausted,
                    "scheduler removed"
                );
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run scheduling and sweeping until `shutdown` fires.
    pub async fn run(
        &self,
        interval: Duration,
        sweep_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            sweep_interval_secs = sweep_interval.as_secs(),
            "scheduling task started"
        );

        let mut schedule_tick = tokio::time::interval(interval.max(MIN_TICK));
        schedule_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(sweep_interval.max(MIN_TICK));
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = schedule_tick.tick() => {
                    if let Err(e) = self.run_once() {
                        error!(error = %e, "scheduling pass failed");
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.sweep() {
                        error!(error = %e, "scheduler sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduling task shutting down");
                    break;
                }
            }
        }
    }
}

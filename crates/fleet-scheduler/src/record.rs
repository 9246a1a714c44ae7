//! Scheduler record handle — the in-memory copy of one unit's scheduling
//! round, kept in sync with the store through atomic updates only.
//!
//! Many node agents hold their own `Scheduler` for the same record. None
//! of them lock anything: every mutation is a single conditional update
//! in the store, and the local copy is replaced with the document the
//! update returned.

use fleet_state::*;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Failures a node may accumulate before it drops out of a round.
pub const DEFAULT_MAX_DEPLOYMENT_FAILURES: u32 = 3;

/// A scheduler record bound to the coordination store.
#[derive(Clone)]
pub struct Scheduler {
    state: StateStore,
    record: SchedulerRecord,
}

impl Scheduler {
    pub fn new(state: StateStore, record: SchedulerRecord) -> Self {
        Self { state, record }
    }

    /// Load the live record for `id`, if any.
    pub fn load(state: StateStore, id: &SchedulerId) -> SchedulerResult<Option<Self>> {
        Ok(state
            .get_scheduler(id)?
            .map(|record| Self::new(state, record)))
    }

    pub fn id(&self) -> &SchedulerId {
        &self.record.id
    }

    pub fn record(&self) -> &SchedulerRecord {
        &self.record
    }

    /// Tickets held by `node_id`, lowest offset first.
    pub fn node_tickets(&self, node_id: &str) -> &[Ticket] {
        self.record
            .tickets
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reload the mutable fields. Returns false if the record is gone.
    pub fn refresh(&mut self) -> SchedulerResult<bool> {
        let Some(stored) = self.state.get_scheduler(&self.record.id)? else {
            return Ok(false);
        };
        self.record.count = stored.count;
        self.record.consumed = stored.consumed;
        self.record.tickets = stored.tickets;
        self.record.failures = stored.failures;
        Ok(true)
    }

    /// Give up every ticket `node_id` holds. Returns false if the record
    /// is gone.
    pub fn clear_tickets(&mut self, node_id: &str) -> SchedulerResult<bool> {
        match self.state.clear_scheduler_tickets(&self.record.id, node_id)? {
            Some(updated) => {
                debug!(
                    unit = %self.record.id.unit,
                    node = %node_id,
                    "scheduler tickets cleared"
                );
                self.record = updated;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Count a failed deployment attempt by `node_id`.
    ///
    /// Returns true once the node has reached `max_failures`; its tickets
    /// were removed by the same update.
    pub fn failure(&mut self, node_id: &str, max_failures: u32) -> SchedulerResult<bool> {
        let updated = self
            .state
            .record_scheduler_failure(&self.record.id, node_id, max_failures)?
            .ok_or_else(|| SchedulerError::NotFound(self.record.id.table_key()))?;

        let limit = updated.failures_for(node_id) >= max_failures;
        if limit {
            warn!(
                unit = %self.record.id.unit,
                node = %node_id,
                failures = updated.failures_for(node_id),
                "node reached deployment failure limit"
            );
        }
        self.record.count = updated.count;
        self.record.consumed = updated.consumed;
        self.record.tickets = updated.tickets;
        self.record.failures = updated.failures;
        Ok(limit)
    }

    /// Whether `node_id` may still use its tickets.
    pub fn ready(&self, node_id: &str, max_failures: u32) -> bool {
        self.record.failures_for(node_id) < max_failures
    }

    /// Claim one ticket fleet-wide. Returns false once `count` tickets
    /// have been consumed or the record is gone.
    pub fn consume(&mut self) -> SchedulerResult<bool> {
        match self.state.consume_scheduler(&self.record.id, epoch_secs())? {
            Some(updated) => {
                self.record.count = updated.count;
                self.record.consumed = updated.consumed;
                self.record.failures = updated.failures;
                self.record.modified_at = updated.modified_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn insert(&self) -> SchedulerResult<()> {
        self.state.insert_scheduler(&self.record)?;
        Ok(())
    }

    pub fn commit(&self) -> SchedulerResult<()> {
        self.state.put_scheduler(&self.record)?;
        Ok(())
    }

    pub fn commit_fields(&self, fields: &[SchedulerField]) -> SchedulerResult<bool> {
        Ok(self.state.commit_scheduler_fields(&self.record, fields)?)
    }

    /// Local access for operator edits followed by `commit_fields`.
    pub fn record_mut(&mut self) -> &mut SchedulerRecord {
        &mut self.record
    }
}

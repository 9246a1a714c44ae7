//! Ticket agent — the node-local consumer of scheduler records.
//!
//! Each hypervisor node runs one agent. On every poll it looks at the
//! active scheduler records, picks its own lowest ticket whose wave has
//! opened, claims it with `consume`, reserves a unit slot and hands the
//! deployment to a callback. Failed attempts roll the reservation back
//! and count against the node.
//!
//! The agent never consumes a ticket ahead of its own lower offsets, and
//! a ticket at offset `k` only opens `k * wave_delay` after the record was
//! created, so later waves act as fallbacks for nodes that stall.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use fleet_placement::instance_to_shape;
use fleet_state::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::record::{DEFAULT_MAX_DEPLOYMENT_FAILURES, Scheduler};
use crate::reservation;

pub type DeployFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback that starts a reserved deployment on this node.
pub type DeployCallback = Box<dyn Fn(DeployRequest) -> DeployFuture + Send + Sync>;

/// Everything a deploy callback needs to start one instance.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub deployment: DeploymentRecord,
    pub instance: InstanceSpec,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_id: NodeId,
    pub max_failures: u32,
    /// Seconds between the opening of consecutive ticket offsets.
    pub wave_delay_secs: u64,
    /// Attempts at the unit reservation compare-and-swap per ticket.
    pub reserve_attempts: u32,
}

impl AgentConfig {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            max_failures: DEFAULT_MAX_DEPLOYMENT_FAILURES,
            wave_delay_secs: 30,
            reserve_attempts: 3,
        }
    }
}

/// Counters from one agent poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub deployed: u32,
    pub failed: u32,
    /// Tickets consumed but whose unit had no free slot left.
    pub no_slot: u32,
}

enum Attempt {
    Deployed,
    Failed,
    NoSlot,
}

/// Position in one scheduler record's ticket list for this node.
#[derive(Debug, Clone)]
struct Cursor {
    round: String,
    created_at: u64,
    next: usize,
}

impl Cursor {
    fn start(record: &SchedulerRecord) -> Self {
        Self {
            round: record.round.clone(),
            created_at: record.created_at,
            next: 0,
        }
    }

    fn is_for(&self, record: &SchedulerRecord) -> bool {
        self.round == record.round && self.created_at == record.created_at
    }
}

pub struct TicketAgent {
    state: StateStore,
    config: AgentConfig,
    deploy_fn: DeployCallback,
    cursors: HashMap<SchedulerId, Cursor>,
}

impl TicketAgent {
    pub fn new(state: StateStore, config: AgentConfig, deploy_fn: DeployCallback) -> Self {
        Self {
            state,
            config,
            deploy_fn,
            cursors: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// The next ticket index to attempt for `record`, if its wave is open.
    fn next_ticket(&mut self, schd: &Scheduler, now: u64) -> Option<Ticket> {
        let record = schd.record();
        let cursor = self
            .cursors
            .entry(record.id.clone())
            .or_insert_with(|| Cursor::start(record));
        if !cursor.is_for(record) {
            *cursor = Cursor::start(record);
        }

        let ticket = schd.node_tickets(&self.config.node_id).get(cursor.next)?;
        let opens_at = record
            .created_at
            .saturating_add(u64::from(ticket.offset) * self.config.wave_delay_secs);
        if now < opens_at {
            return None;
        }
        cursor.next += 1;
        Some(ticket.clone())
    }

    /// Attempt every ticket that is due on this node.
    pub async fn poll_once(&mut self) -> SchedulerResult<PollReport> {
        let mut report = PollReport::default();
        let now = epoch_secs();
        let active = self.state.list_active_schedulers()?;

        self.cursors
            .retain(|id, _| active.iter().any(|record| &record.id == id));

        for record in active {
            let mut schd = Scheduler::new(self.state.clone(), record);
            if !schd.ready(&self.config.node_id, self.config.max_failures) {
                continue;
            }
            let Some(ticket) = self.next_ticket(&schd, now) else {
                continue;
            };
            if !schd.consume()? {
                debug!(unit = %schd.id().unit, "scheduler exhausted before consume");
                continue;
            }

            match self.attempt(&mut schd, &ticket).await? {
                Attempt::Deployed => report.deployed += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::NoSlot => report.no_slot += 1,
            }
        }

        Ok(report)
    }

    /// Reserve a slot, record the deployment and run the deploy callback.
    async fn attempt(&self, schd: &mut Scheduler, ticket: &Ticket) -> SchedulerResult<Attempt> {
        let record = schd.record().clone();
        let node_id = &self.config.node_id;

        let spec = self
            .state
            .get_spec(&record.spec)?
            .ok_or_else(|| SchedulerError::NotFound(format!("spec {}", record.spec)))?;
        let instance = spec
            .instance
            .ok_or_else(|| SchedulerError::MissingInstance(record.id.unit.clone()))?;

        let deploy_id = uuid::Uuid::new_v4().to_string();
        if !self.reserve_slot(&record, &deploy_id)? {
            debug!(unit = %record.id.unit, node = %node_id, "no free unit slot");
            return Ok(Attempt::NoSlot);
        }

        let mut deployment = DeploymentRecord {
            id: deploy_id.clone(),
            pod: record.id.pod.clone(),
            unit: record.id.unit.clone(),
            spec: record.spec.clone(),
            node: node_id.clone(),
            state: DeploymentState::Reserved,
            created_at: epoch_secs(),
        };
        if let Err(e) = self.state.put_deployment(&deployment) {
            self.roll_back(schd, &record.id.unit, &deploy_id);
            return Err(e.into());
        }

        let request = DeployRequest {
            deployment: deployment.clone(),
            instance: instance.clone(),
        };
        if let Err(e) = (self.deploy_fn)(request).await {
            warn!(
                unit = %record.id.unit,
                node = %node_id,
                deployment = %deploy_id,
                offset = ticket.offset,
                error = %e,
                "deployment failed"
            );
            self.roll_back(schd, &record.id.unit, &deploy_id);
            return Ok(Attempt::Failed);
        }

        deployment.state = DeploymentState::Deployed;
        self.state.put_deployment(&deployment)?;
        let shape = instance_to_shape(&instance);
        self.state
            .reserve_node_capacity(node_id, shape.processors, shape.memory_units())?;
        info!(
            unit = %record.id.unit,
            node = %node_id,
            deployment = %deploy_id,
            offset = ticket.offset,
            "deployment started"
        );
        Ok(Attempt::Deployed)
    }

    /// Release a reserved unit slot and count the failure against this node.
    ///
    /// Every step runs even when an earlier one fails.
    fn roll_back(&self, schd: &mut Scheduler, unit_id: &str, deploy_id: &str) {
        let node_id = &self.config.node_id;
        if let Err(e) = reservation::remove_deployment(&self.state, unit_id, deploy_id) {
            error!(
                unit = %unit_id,
                deployment = %deploy_id,
                error = %e,
                "failed to release unit slot"
            );
        }
        if let Err(e) = self.state.delete_deployment(deploy_id) {
            error!(deployment = %deploy_id, error = %e, "failed to delete deployment record");
        }
        if let Err(e) = schd.failure(node_id, self.config.max_failures) {
            error!(
                unit = %unit_id,
                node = %node_id,
                error = %e,
                "failed to record node failure"
            );
        }
    }

    /// Compare-and-swap a slot on the unit, re-reading it after each loss.
    fn reserve_slot(&self, record: &SchedulerRecord, deploy_id: &str) -> SchedulerResult<bool> {
        for _ in 0..self.config.reserve_attempts.max(1) {
            let Some(unit) = self.state.get_unit(&record.id.unit)? else {
                return Ok(false);
            };
            if reservation::reserve(&self.state, &unit, deploy_id, record.override_count)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Give up this node's tickets on every active scheduler record.
    pub fn relinquish(&self) -> SchedulerResult<u32> {
        let mut cleared = 0;
        for record in self.state.list_active_schedulers()? {
            if !record.tickets.contains_key(&self.config.node_id) {
                continue;
            }
            let mut schd = Scheduler::new(self.state.clone(), record);
            if schd.clear_tickets(&self.config.node_id)? {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Poll until `shutdown` fires, then hand back outstanding tickets.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.config.node_id,
            interval_secs = interval.as_secs(),
            "ticket agent started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "ticket agent poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("ticket agent shutting down");
                    break;
                }
            }
        }

        match self.relinquish() {
            Ok(cleared) if cleared > 0 => {
                info!(cleared, "released tickets on shutdown");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to release tickets"),
        }
    }
}

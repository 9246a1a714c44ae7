//! Instance unit scheduling — one placement round per unit.
//!
//! Resolves the unit's candidate nodes, runs the placement engine and
//! writes the resulting tickets as a single new scheduler record. Nothing
//! is written unless the whole assignment was computed.

use fleet_placement::{OffsetPolicy, Strategy, instance_to_shape, node_info_to_capacity, place};
use fleet_state::*;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::record::Scheduler;

/// What a scheduling attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new scheduler record was inserted.
    Scheduled {
        count: u32,
        tickets: usize,
        strategy: Strategy,
        overscheduled: u32,
    },
    /// No usable candidate; the next tick retries.
    NoNodes {
        offline_count: u32,
        no_mount_count: u32,
    },
    /// Another scheduler inserted the record first.
    Duplicate,
}

/// A schedulable unit paired with the spec revision to deploy.
pub struct InstanceUnit {
    state: StateStore,
    unit: Unit,
    spec: Spec,
    policy: OffsetPolicy,
}

impl InstanceUnit {
    pub fn new(state: StateStore, unit: Unit, spec: Spec) -> Self {
        Self {
            state,
            unit,
            spec,
            policy: OffsetPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OffsetPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Candidate nodes for `instance`. A pinned node wins over a shape.
    fn candidates(&self, instance: &InstanceSpec, now: u64) -> SchedulerResult<NodeQuery> {
        if let Some(node_id) = &instance.node {
            let node = self
                .state
                .get_node(node_id)?
                .ok_or_else(|| SchedulerError::NotFound(format!("node {node_id}")))?;
            let mut query = NodeQuery::default();
            if node.is_online(now) {
                query.nodes.push(node);
            } else {
                query.offline_count = 1;
            }
            return Ok(query);
        }

        let shape_id = instance
            .shape
            .as_ref()
            .ok_or_else(|| SchedulerError::MissingPlacementTarget(self.unit.id.clone()))?;
        let shape = self
            .state
            .get_shape(shape_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("shape {shape_id}")))?;
        Ok(self.state.query_shape_nodes(&shape, instance, now)?)
    }

    /// Compute and persist tickets for this unit.
    ///
    /// `count == 0` fills the gap between the unit's target and its
    /// attached deployments. A non-zero `count` is an explicit override
    /// and is recorded as `override_count` on top of the existing
    /// deployments.
    pub fn schedule(&self, count: u32) -> SchedulerResult<ScheduleOutcome> {
        if !self.unit.kind.is_schedulable() {
            return Err(SchedulerError::InvalidKind(self.unit.kind.as_str().to_string()));
        }
        let instance = self
            .spec
            .instance
            .as_ref()
            .ok_or_else(|| SchedulerError::MissingInstance(self.unit.id.clone()))?;
        if instance.node.is_none() && instance.shape.is_none() {
            return Err(SchedulerError::MissingPlacementTarget(self.unit.id.clone()));
        }

        let (count, override_count) = if count == 0 {
            (self.unit.missing(), 0)
        } else {
            let attached = u32::try_from(self.unit.deployments.len()).unwrap_or(u32::MAX);
            let target = attached
                .checked_add(count)
                .ok_or_else(|| SchedulerError::InvalidCount(self.unit.id.clone()))?;
            (count, target)
        };
        if count == 0 {
            return Err(SchedulerError::ZeroCount(self.unit.id.clone()));
        }

        let now = epoch_secs();
        let query = self.candidates(instance, now)?;
        if query.nodes.is_empty() {
            warn!(
                pod = %self.unit.pod,
                unit = %self.unit.id,
                offline_count = query.offline_count,
                no_mount_count = query.no_mount_count,
                "failed to find nodes to schedule"
            );
            return Ok(ScheduleOutcome::NoNodes {
                offline_count: query.offline_count,
                no_mount_count: query.no_mount_count,
            });
        }

        let nodes = query.nodes.iter().map(node_info_to_capacity).collect();
        let placement = place(nodes, &instance_to_shape(instance), count, &self.policy)?;
        if placement.overscheduled > 0 {
            info!(
                pod = %self.unit.pod,
                unit = %self.unit.id,
                overscheduled = placement.overscheduled,
                "overscheduled unit"
            );
        }

        let tickets = placement.ticket_count();
        let schd = Scheduler::new(
            self.state.clone(),
            SchedulerRecord {
                id: self.unit.scheduler_id(),
                round: uuid::Uuid::new_v4().to_string(),
                kind: self.unit.kind,
                created_at: now,
                modified_at: now,
                count,
                spec: self.spec.id.clone(),
                override_count,
                consumed: 0,
                tickets: placement.tickets,
                failures: Default::default(),
            },
        );

        match schd.insert() {
            Ok(()) => {}
            Err(SchedulerError::State(e)) if e.is_duplicate() => {
                warn!(
                    pod = %self.unit.pod,
                    unit = %self.unit.id,
                    "scheduler already inserted by another round"
                );
                return Ok(ScheduleOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        }

        info!(
            pod = %self.unit.pod,
            unit = %self.unit.id,
            count,
            tickets,
            strategy = placement.strategy.as_str(),
            "unit scheduled"
        );
        Ok(ScheduleOutcome::Scheduled {
            count,
            tickets,
            strategy: placement.strategy,
            overscheduled: placement.overscheduled,
        })
    }
}

fn load_spec(state: &StateStore, spec_id: &str) -> SchedulerResult<Spec> {
    state
        .get_spec(spec_id)?
        .ok_or_else(|| SchedulerError::NotFound(format!("spec {spec_id}")))
}

/// Periodic entry point: schedule `unit` unless a round is already live.
///
/// Returns `None` when a scheduler record exists or the unit kind is not
/// placed by the scheduler.
pub fn schedule(
    state: &StateStore,
    unit: &Unit,
    policy: &OffsetPolicy,
) -> SchedulerResult<Option<ScheduleOutcome>> {
    if state.scheduler_exists(&unit.scheduler_id())? {
        debug!(unit = %unit.id, "scheduler already active");
        return Ok(None);
    }
    if !unit.kind.is_schedulable() {
        return Ok(None);
    }

    let spec = load_spec(state, &unit.deploy_spec)?;
    let outcome = InstanceUnit::new(state.clone(), unit.clone(), spec)
        .with_policy(*policy)
        .schedule(0)?;
    Ok(Some(outcome))
}

/// Operator entry point: schedule `count` extra deployments of `spec_id`
/// (or the unit's current spec).
///
/// Image units always build exactly one deployment.
pub fn manual_schedule(
    state: &StateStore,
    unit: &Unit,
    spec_id: Option<&str>,
    count: u32,
    policy: &OffsetPolicy,
) -> SchedulerResult<ScheduleOutcome> {
    if state.scheduler_exists(&unit.scheduler_id())? {
        return Err(SchedulerError::SchedulerActive(unit.id.clone()));
    }

    let spec = load_spec(state, spec_id.unwrap_or(&unit.deploy_spec))?;
    if spec.unit != unit.id {
        return Err(SchedulerError::InvalidDeploySpec(spec.id));
    }

    let count = match unit.kind {
        UnitKind::Instance => count,
        UnitKind::Image => 1,
        other => return Err(SchedulerError::InvalidKind(other.as_str().to_string())),
    };

    InstanceUnit::new(state.clone(), unit.clone(), spec)
        .with_policy(*policy)
        .schedule(count)
}

//! Unit reservation — claiming one of a unit's deployment slots.
//!
//! [`reserve`] is an optimistic compare-and-swap: the unit's `count` and
//! the length of its deployment list, as last read, act as the version.
//! A lost race is a plain `false`, and the caller re-reads the unit
//! before trying again.
//!
//! [`restore_deployment`] and [`remove_deployment`] are unconditional and
//! meant for the single process that owns a deployment's rollback.

use fleet_state::{StateStore, Unit};
use tracing::debug;

use crate::error::SchedulerResult;

/// Attach `deploy_id` to `unit` if the stored unit still matches it.
///
/// With a non-zero `override_count` the slot limit is the override
/// instead of `unit.count`. A unit that is already full is refused
/// without touching the store.
pub fn reserve(
    state: &StateStore,
    unit: &Unit,
    deploy_id: &str,
    override_count: u32,
) -> SchedulerResult<bool> {
    let limit = if override_count == 0 {
        unit.count
    } else {
        override_count
    };
    if unit.deployments.len() >= limit as usize {
        debug!(unit = %unit.id, limit, "unit has no free deployment slot");
        return Ok(false);
    }

    let reserved = state.reserve_unit_deployment(
        &unit.id,
        &unit.pod,
        unit.count,
        unit.deployments.len(),
        deploy_id,
    )?;
    debug!(unit = %unit.id, deployment = %deploy_id, reserved, "unit reservation");
    Ok(reserved)
}

/// Put a deployment back on its unit.
pub fn restore_deployment(
    state: &StateStore,
    unit_id: &str,
    deploy_id: &str,
) -> SchedulerResult<bool> {
    Ok(state.push_unit_deployment(unit_id, deploy_id)?)
}

/// Detach a deployment from its unit.
pub fn remove_deployment(
    state: &StateStore,
    unit_id: &str,
    deploy_id: &str,
) -> SchedulerResult<bool> {
    Ok(state.pull_unit_deployment(unit_id, deploy_id)?)
}

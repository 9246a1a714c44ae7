//! redb table definitions for the fleet coordination store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Hypervisor nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Zones keyed by `{zone_id}`.
pub const ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("zones");

/// Instance shapes keyed by `{shape_id}`.
pub const SHAPES: TableDefinition<&str, &[u8]> = TableDefinition::new("shapes");

/// Unit specs keyed by `{spec_id}`.
pub const SPECS: TableDefinition<&str, &[u8]> = TableDefinition::new("specs");

/// Units keyed by `{unit_id}`.
pub const UNITS: TableDefinition<&str, &[u8]> = TableDefinition::new("units");

/// Scheduler records keyed by `{pod}/{unit}`.
pub const SCHEDULERS: TableDefinition<&str, &[u8]> = TableDefinition::new("schedulers");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

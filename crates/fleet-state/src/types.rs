//! Domain types for the fleet coordination store.
//!
//! These types represent the persisted state of the node inventory,
//! units and their specs, scheduler records, and deployments. All types
//! are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a hypervisor node.
pub type NodeId = String;

/// Unique identifier for a zone.
pub type ZoneId = String;

/// Unique identifier for a datacenter.
pub type DatacenterId = String;

/// Unique identifier for an instance shape.
pub type ShapeId = String;

/// Unique identifier for a unit spec revision.
pub type SpecId = String;

/// Unique identifier for a unit.
pub type UnitId = String;

/// Unique identifier for a pod (a group of units).
pub type PodId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Heartbeats older than this mark a node offline.
pub const NODE_ONLINE_TTL_SECS: u64 = 30;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Inventory ─────────────────────────────────────────────────────

/// A hypervisor node and its capacity counters.
///
/// Memory is counted in units of 1 GiB, CPU in whole processors. The
/// `*_res` fields hold capacity already promised to deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub zone: ZoneId,
    /// Roles matched against shape roles.
    pub roles: Vec<String>,
    pub cpu_units: u32,
    pub memory_units: f64,
    pub cpu_units_res: u32,
    pub memory_units_res: f64,
    /// Unix timestamp of last heartbeat.
    pub last_heartbeat: u64,
}

impl NodeInfo {
    pub fn is_online(&self, now: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) <= NODE_ONLINE_TTL_SECS
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.is_empty() || roles.iter().any(|r| self.roles.contains(r))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub id: ZoneId,
    pub datacenter: DatacenterId,
    pub name: String,
}

/// A named instance shape that resolves to a set of candidate nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    pub name: String,
    pub datacenter: DatacenterId,
    pub roles: Vec<String>,
    pub processors: u32,
    /// Memory in MiB.
    pub memory: u32,
    pub flexible: bool,
}

// ── Specs ─────────────────────────────────────────────────────────

/// A revision of a unit's definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spec {
    pub id: SpecId,
    pub unit: UnitId,
    pub instance: Option<InstanceSpec>,
    pub created_at: u64,
}

/// Resource shape and placement target of an instance unit.
///
/// Exactly one of `node` (pinned) and `shape` selects the candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InstanceSpec {
    /// Optional zone restriction inside the shape's datacenter.
    pub zone: Option<ZoneId>,
    pub node: Option<NodeId>,
    pub shape: Option<ShapeId>,
    pub vpc: String,
    pub subnet: String,
    pub image: String,
    pub processors: u32,
    /// Memory in MiB.
    pub memory: u32,
    pub mounts: Vec<MountSpec>,
}

/// A disk mount; the instance can only run on a node holding its disks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountSpec {
    pub name: String,
    pub nodes: Vec<NodeId>,
}

// ── Units ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Instance,
    Image,
    Firewall,
    Domain,
}

impl UnitKind {
    /// Whether units of this kind are placed by the scheduler.
    pub fn is_schedulable(self) -> bool {
        matches!(self, UnitKind::Instance | UnitKind::Image)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Instance => "instance",
            UnitKind::Image => "image",
            UnitKind::Firewall => "firewall",
            UnitKind::Domain => "domain",
        }
    }
}

/// A workload definition with a desired replica count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub id: UnitId,
    pub pod: PodId,
    pub name: String,
    pub kind: UnitKind,
    /// Desired replica count.
    pub count: u32,
    /// Attached deployments, in reservation order.
    pub deployments: Vec<DeploymentId>,
    /// Spec revision new deployments are built from.
    pub deploy_spec: SpecId,
}

impl Unit {
    pub fn has_deployment(&self, deploy_id: &str) -> bool {
        self.deployments.iter().any(|d| d == deploy_id)
    }

    /// Deployments still missing to reach `count`.
    pub fn missing(&self) -> u32 {
        self.count.saturating_sub(self.deployments.len() as u32)
    }

    pub fn scheduler_id(&self) -> SchedulerId {
        SchedulerId {
            pod: self.pod.clone(),
            unit: self.id.clone(),
        }
    }
}

// ── Schedulers ────────────────────────────────────────────────────

/// Identity of a scheduler record: one per unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerId {
    pub pod: PodId,
    pub unit: UnitId,
}

impl SchedulerId {
    /// Build the composite key for the schedulers table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.pod, self.unit)
    }
}

/// Permission for one node to attempt one deployment in a given wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(rename = "n")]
    pub node: NodeId,
    #[serde(rename = "t")]
    pub offset: u32,
}

/// Node → ordered tickets held by that node.
pub type TicketsStore = HashMap<NodeId, Vec<Ticket>>;

/// The persisted outcome of one placement computation for a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerRecord {
    pub id: SchedulerId,
    /// Distinguishes successive rounds for the same unit.
    #[serde(default)]
    pub round: String,
    pub kind: UnitKind,
    pub created_at: u64,
    pub modified_at: u64,
    /// Deployments this round intends to place.
    pub count: u32,
    pub spec: SpecId,
    /// Non-zero when an operator override set the unit's target.
    pub override_count: u32,
    /// Tickets claimed fleet-wide. Never exceeds `count`.
    pub consumed: u32,
    pub tickets: TicketsStore,
    #[serde(default)]
    pub failures: HashMap<NodeId, u32>,
}

impl SchedulerRecord {
    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.count
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.values().map(Vec::len).sum()
    }

    pub fn failures_for(&self, node_id: &str) -> u32 {
        self.failures.get(node_id).copied().unwrap_or(0)
    }
}

/// Fields that `commit_scheduler_fields` can persist selectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerField {
    Count,
    OverrideCount,
    Consumed,
    Tickets,
    Failures,
    Modified,
}

// ── Deployments ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// A unit slot is claimed; the instance is not running yet.
    Reserved,
    Deployed,
}

/// One concrete deployment of a unit on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub pod: PodId,
    pub unit: UnitId,
    pub spec: SpecId,
    pub node: NodeId,
    pub state: DeploymentState,
    pub created_at: u64,
}

//! Type conversions between state store types and placement types.
//!
//! Bridges `fleet_state::{NodeInfo, InstanceSpec}` to the placement
//! engine's `NodeCapacity` and `InstanceShape`.

use fleet_state::{InstanceSpec, NodeInfo};

use crate::capacity::{InstanceShape, NodeCapacity};

/// Snapshot a [`NodeInfo`] into a scratch [`NodeCapacity`].
pub fn node_info_to_capacity(node: &NodeInfo) -> NodeCapacity {
    NodeCapacity {
        node_id: node.id.clone(),
        cpu_units: node.cpu_units,
        memory_units: node.memory_units,
        cpu_units_res: node.cpu_units_res,
        memory_units_res: node.memory_units_res,
    }
}

/// Extract the per-instance demand from an [`InstanceSpec`].
pub fn instance_to_shape(instance: &InstanceSpec) -> InstanceShape {
    InstanceShape {
        processors: instance.processors,
        memory: instance.memory,
    }
}

//! Node capacity math for placement decisions.
//!
//! A [`NodeCapacity`] is a scratch copy of a node's counters. Placement
//! mutates these copies to simulate the load it is about to add; the
//! authoritative inventory is never touched here.
//!
//! - **Usage**: weighted fill level (75% memory, 25% CPU), 0..=100
//! - **Headroom**: memory is never oversubscribed, CPU up to 2x

use std::cmp::Ordering;

/// CPU may be promised up to this multiple of physical processors.
const CPU_OVERSUBSCRIPTION: u32 = 2;

const MEMORY_WEIGHT: f64 = 0.75;
const CPU_WEIGHT: f64 = 0.25;

/// Resource capacity and reservations for a single node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeCapacity {
    pub node_id: String,
    pub cpu_units: u32,
    /// Memory in GiB.
    pub memory_units: f64,
    pub cpu_units_res: u32,
    pub memory_units_res: f64,
}

/// Per-instance resource demand of a unit.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstanceShape {
    pub processors: u32,
    /// Memory in MiB.
    pub memory: u32,
}

impl InstanceShape {
    /// Memory demand in GiB, the unit node counters are kept in.
    pub fn memory_units(&self) -> f64 {
        f64::from(self.memory) / 1024.0
    }
}

impl NodeCapacity {
    fn memory_ratio(&self) -> f64 {
        if self.memory_units > 0.0 {
            self.memory_units_res / self.memory_units
        } else {
            1.0
        }
    }

    fn cpu_ratio(&self) -> f64 {
        if self.cpu_units > 0 {
            f64::from(self.cpu_units_res) / f64::from(self.cpu_units)
        } else {
            1.0
        }
    }

    /// Load score used to order candidates (lower sorts first).
    ///
    /// A node without capacity counts as full.
    pub fn usage(&self) -> u32 {
        let weighted =
            MEMORY_WEIGHT * self.memory_ratio().min(1.0) + CPU_WEIGHT * self.cpu_ratio().min(1.0);
        (100.0 * weighted.min(1.0)) as u32
    }

    /// Weighted load without the per-resource caps; separates nodes that
    /// are both past 100% in [`usage`](Self::usage).
    pub fn load(&self) -> f64 {
        MEMORY_WEIGHT * self.memory_ratio() + CPU_WEIGHT * self.cpu_ratio()
    }

    /// Whether one more instance of `shape` fits in the unreserved capacity.
    pub fn size_resource(&self, shape: &InstanceShape) -> bool {
        let memory_fits = self.memory_units_res + shape.memory_units() <= self.memory_units;
        let cpu_fits = u64::from(self.cpu_units_res) + u64::from(shape.processors)
            <= u64::from(self.cpu_units) * u64::from(CPU_OVERSUBSCRIPTION);
        memory_fits && cpu_fits
    }

    /// Book one instance of `shape` against this copy.
    pub fn reserve(&mut self, shape: &InstanceShape) {
        self.cpu_units_res += shape.processors;
        self.memory_units_res += shape.memory_units();
    }
}

/// Candidate ordering: lowest usage first, then lowest uncapped load.
pub fn compare_usage(a: &NodeCapacity, b: &NodeCapacity) -> Ordering {
    a.usage()
        .cmp(&b.usage())
        .then_with(|| a.load().partial_cmp(&b.load()).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(id: &str, cpu: u32, mem: f64, cpu_res: u32, mem_res: f64) -> NodeCapacity {
        NodeCapacity {
            node_id: id.to_string(),
            cpu_units: cpu,
            memory_units: mem,
            cpu_units_res: cpu_res,
            memory_units_res: mem_res,
        }
    }

    fn shape(processors: u32, memory: u32) -> InstanceShape {
        InstanceShape { processors, memory }
    }

    #[test]
    fn usage_weights_memory_over_cpu() {
        let mem_half = make_node("n1", 8, 16.0, 0, 8.0);
        let cpu_half = make_node("n2", 8, 16.0, 4, 0.0);

        assert_eq!(mem_half.usage(), 37);
        assert_eq!(cpu_half.usage(), 12);
    }

    #[test]
    fn usage_caps_at_full() {
        let over = make_node("n1", 4, 8.0, 16, 12.0);
        assert_eq!(over.usage(), 100);

        let empty = make_node("n2", 0, 0.0, 0, 0.0);
        assert_eq!(empty.usage(), 100);
    }

    #[test]
    fn load_orders_nodes_past_full() {
        let a = make_node("a", 4, 8.0, 8, 8.0);
        let b = make_node("b", 4, 8.0, 8, 12.0);

        assert_eq!(a.usage(), b.usage());
        assert_eq!(compare_usage(&a, &b), Ordering::Less);
    }

    #[test]
    fn memory_is_never_oversubscribed() {
        let node = make_node("n1", 8, 4.0, 0, 3.0);

        assert!(node.size_resource(&shape(1, 1024)));
        assert!(!node.size_resource(&shape(1, 2048)));
    }

    #[test]
    fn cpu_oversubscribes_twice() {
        let node = make_node("n1", 4, 64.0, 6, 0.0);

        assert!(node.size_resource(&shape(2, 1024)));
        assert!(!node.size_resource(&shape(3, 1024)));
    }

    #[test]
    fn reserve_consumes_headroom() {
        let mut node = make_node("n1", 4, 4.0, 0, 0.0);
        let s = shape(2, 2048);

        node.reserve(&s);
        assert!(node.size_resource(&s));
        node.reserve(&s);
        assert!(!node.size_resource(&s));
        assert_eq!(node.cpu_units_res, 4);
        assert_eq!(node.memory_units_res, 4.0);
    }
}

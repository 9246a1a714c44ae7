//! Placement engine — turns a candidate node list into wave-ordered tickets.
//!
//! Candidates are sorted by usage and split into two tiers:
//! 1. **Primary** nodes have headroom for one more instance right now
//! 2. **Backup** nodes do not, and only absorb overflow
//!
//! When there are more primary nodes than the requested count, the cheap
//! [`schedule_simple`] batches candidates into waves of `count`. Otherwise
//! [`schedule_complex`] places one ticket at a time while simulating the
//! capacity each ticket will consume.

use fleet_state::{Ticket, TicketsStore};
use tracing::{debug, warn};

use crate::capacity::{InstanceShape, NodeCapacity, compare_usage};
use crate::error::{PlacementError, PlacementResult};

/// Upper bound on single-ticket assignments per complex generation.
pub const COMPLEX_ITERATION_LIMIT: u32 = 100;

/// How ticket offsets advance between waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OffsetPolicy {
    /// Added to the offset on the first advance.
    pub init: u32,
    /// Added on every later advance.
    pub inc: u32,
    /// Number of generations the complex strategy computes.
    pub count: u32,
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        Self {
            init: 1,
            inc: 1,
            count: 1,
        }
    }
}

#[derive(Debug, Default)]
struct Waves {
    offset: u32,
    advanced: bool,
}

impl Waves {
    fn advance(&mut self, policy: &OffsetPolicy) {
        self.offset += if self.advanced { policy.inc } else { policy.init };
        self.advanced = true;
    }
}

/// Which assignment strategy produced a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Simple,
    Complex,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Simple => "simple",
            Strategy::Complex => "complex",
        }
    }
}

/// A computed ticket assignment for one unit.
#[derive(Debug, Clone)]
pub struct Placement {
    pub tickets: TicketsStore,
    pub strategy: Strategy,
    /// Tickets given to nodes that lacked headroom when picked.
    pub overscheduled: u32,
}

impl Placement {
    pub fn ticket_count(&self) -> usize {
        self.tickets.values().map(Vec::len).sum()
    }

    /// Tickets at `offset`, across all nodes.
    pub fn wave_size(&self, offset: u32) -> usize {
        self.tickets
            .values()
            .flatten()
            .filter(|t| t.offset == offset)
            .count()
    }
}

fn push_ticket(tickets: &mut TicketsStore, node_id: &str, offset: u32) {
    tickets.entry(node_id.to_string()).or_default().push(Ticket {
        node: node_id.to_string(),
        offset,
    });
}

/// Sort candidates by usage and split them into primary and backup tiers.
///
/// Returns indices into `nodes`, each tier in ascending usage order. Ties
/// keep the input order.
pub fn process_nodes(nodes: &[NodeCapacity], shape: &InstanceShape) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by(|&a, &b| compare_usage(&nodes[a], &nodes[b]));
    order
        .into_iter()
        .partition(|&idx| nodes[idx].size_resource(shape))
}

/// Batch primary then backup nodes into waves of exactly `count` tickets.
///
/// Every candidate receives one ticket; the final wave holds whatever is
/// left over.
pub fn schedule_simple(
    nodes: &[NodeCapacity],
    primary: &[usize],
    backup: &[usize],
    count: u32,
    policy: &OffsetPolicy,
) -> PlacementResult<Placement> {
    if count == 0 {
        return Err(PlacementError::ZeroCount);
    }

    let mut tickets = TicketsStore::new();
    let mut waves = Waves::default();
    let mut left = count;

    for &idx in primary.iter().chain(backup) {
        if left == 0 {
            left = count;
            waves.advance(policy);
        }
        push_ticket(&mut tickets, &nodes[idx].node_id, waves.offset);
        left -= 1;
    }

    Ok(Placement {
        tickets,
        strategy: Strategy::Simple,
        overscheduled: 0,
    })
}

/// Place `count` tickets per generation, one at a time, simulating load.
///
/// Tiers are fixed from `primary`/`backup` as computed at the start. Each
/// pick re-sorts the candidates and takes the least loaded primary-tier
/// node that still has simulated headroom, falling back to the least
/// loaded backup-tier node. A primary node that fills up is not reused as
/// overflow. At least one generation is computed even when
/// `policy.count` is zero.
pub fn schedule_complex(
    nodes: &mut [NodeCapacity],
    primary: &[usize],
    backup: &[usize],
    shape: &InstanceShape,
    count: u32,
    policy: &OffsetPolicy,
) -> PlacementResult<Placement> {
    if count == 0 {
        return Err(PlacementError::ZeroCount);
    }

    let mut is_backup = vec![false; nodes.len()];
    for &idx in backup {
        is_backup[idx] = true;
    }

    let mut tickets = TicketsStore::new();
    let mut waves = Waves::default();
    let mut overscheduled = 0;
    let mut left = count;

    // Opening pass: every node with headroom gets one ticket first.
    let opening = if primary.is_empty() {
        debug!(backup = backup.len(), "no primary nodes, opening on backup nodes");
        backup
    } else {
        primary
    };
    for &idx in opening {
        if left == 0 {
            break;
        }
        push_ticket(&mut tickets, &nodes[idx].node_id, waves.offset);
        nodes[idx].reserve(shape);
        if is_backup[idx] {
            overscheduled += 1;
        }
        left -= 1;
    }

    for _ in 0..policy.count.max(1) {
        let mut iterations = 0;
        while left > 0 && iterations < COMPLEX_ITERATION_LIMIT {
            let (fits, lacks) = process_nodes(nodes, shape);
            let pick = fits
                .into_iter()
                .find(|&idx| !is_backup[idx])
                .map(|idx| (idx, false))
                .or_else(|| {
                    lacks
                        .into_iter()
                        .find(|&idx| is_backup[idx])
                        .map(|idx| (idx, true))
                });
            let Some((idx, over)) = pick else {
                break;
            };

            push_ticket(&mut tickets, &nodes[idx].node_id, waves.offset);
            nodes[idx].reserve(shape);
            if over {
                overscheduled += 1;
            }
            left -= 1;
            iterations += 1;
        }

        if left > 0 {
            warn!(
                remaining = left,
                offset = waves.offset,
                "count remaining after complex schedule"
            );
            return Err(PlacementError::CapacityExhausted {
                remaining: left,
                offset: waves.offset,
            });
        }

        left = count;
        waves.advance(policy);
    }

    Ok(Placement {
        tickets,
        strategy: Strategy::Complex,
        overscheduled,
    })
}

/// Compute the ticket assignment for `count` instances of `shape`.
///
/// `nodes` is consumed as a scratch arena: the complex strategy mutates
/// its reservation counters while simulating.
pub fn place(
    mut nodes: Vec<NodeCapacity>,
    shape: &InstanceShape,
    count: u32,
    policy: &OffsetPolicy,
) -> PlacementResult<Placement> {
    if count == 0 {
        return Err(PlacementError::ZeroCount);
    }

    let (primary, backup) = process_nodes(&nodes, shape);
    let placement = if (count as usize) < primary.len() {
        schedule_simple(&nodes, &primary, &backup, count, policy)?
    } else {
        schedule_complex(&mut nodes, &primary, &backup, shape, count, policy)?
    };

    debug!(
        strategy = placement.strategy.as_str(),
        primary = primary.len(),
        backup = backup.len(),
        tickets = placement.ticket_count(),
        overscheduled = placement.overscheduled,
        "placement computed"
    );
    Ok(placement)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A node with `slots` free instances of [`small`], loaded to `cpu_res`.
    fn make_node(id: &str, slots: u32, cpu_res: u32) -> NodeCapacity {
        NodeCapacity {
            node_id: id.to_string(),
            cpu_units: 64,
            memory_units: f64::from(slots),
            cpu_units_res: cpu_res,
            memory_units_res: 0.0,
        }
    }

    fn full_node(id: &str) -> NodeCapacity {
        NodeCapacity {
            node_id: id.to_string(),
            cpu_units: 64,
            memory_units: 4.0,
            cpu_units_res: 0,
            memory_units_res: 4.0,
        }
    }

    fn small() -> InstanceShape {
        InstanceShape {
            processors: 1,
            memory: 1024,
        }
    }

    fn offsets_of(placement: &Placement, node: &str) -> Vec<u32> {
        placement
            .tickets
            .get(node)
            .map(|t| t.iter().map(|t| t.offset).collect())
            .unwrap_or_default()
    }

    #[test]
    fn process_nodes_sorts_and_tiers() {
        let nodes = vec![
            make_node("busy", 4, 40),
            full_node("full"),
            make_node("idle", 4, 0),
        ];

        let (primary, backup) = process_nodes(&nodes, &small());

        let primary: Vec<_> = primary.iter().map(|&i| nodes[i].node_id.as_str()).collect();
        let backup: Vec<_> = backup.iter().map(|&i| nodes[i].node_id.as_str()).collect();
        assert_eq!(primary, vec!["idle", "busy"]);
        assert_eq!(backup, vec!["full"]);
    }

    #[test]
    fn simple_batches_lowest_usage_first() {
        // Five primary nodes, deliberately out of order.
        let nodes = vec![
            make_node("n4", 8, 32),
            make_node("n1", 8, 8),
            make_node("n5", 8, 40),
            make_node("n3", 8, 24),
            make_node("n2", 8, 16),
        ];

        let placement = place(nodes, &small(), 2, &OffsetPolicy::default()).unwrap();

        assert_eq!(placement.strategy, Strategy::Simple);
        assert_eq!(offsets_of(&placement, "n1"), vec![0]);
        assert_eq!(offsets_of(&placement, "n2"), vec![0]);
        assert_eq!(offsets_of(&placement, "n3"), vec![1]);
        assert_eq!(offsets_of(&placement, "n4"), vec![1]);
        assert_eq!(offsets_of(&placement, "n5"), vec![2]);
    }

    #[test]
    fn simple_waves_are_exactly_count_sized() {
        let nodes: Vec<_> = (0..7).map(|i| make_node(&format!("n{i}"), 8, i)).collect();

        let placement = place(nodes, &small(), 3, &OffsetPolicy::default()).unwrap();

        assert_eq!(placement.wave_size(0), 3);
        assert_eq!(placement.wave_size(1), 3);
        assert_eq!(placement.wave_size(2), 1);
        assert_eq!(placement.ticket_count(), 7);
    }

    #[test]
    fn simple_reaches_backup_only_after_primaries() {
        let nodes = vec![
            full_node("b1"),
            make_node("p1", 8, 0),
            make_node("p2", 8, 1),
            full_node("b2"),
            make_node("p3", 8, 2),
        ];

        let placement = place(nodes, &small(), 2, &OffsetPolicy::default()).unwrap();

        assert_eq!(offsets_of(&placement, "p1"), vec![0]);
        assert_eq!(offsets_of(&placement, "p2"), vec![0]);
        assert_eq!(offsets_of(&placement, "p3"), vec![1]);
        assert_eq!(offsets_of(&placement, "b1"), vec![1]);
        assert_eq!(offsets_of(&placement, "b2"), vec![2]);
        assert_eq!(placement.overscheduled, 0);
    }

    #[test]
    fn simple_uses_custom_offset_steps() {
        let nodes: Vec<_> = (0..4).map(|i| make_node(&format!("n{i}"), 8, i)).collect();
        let policy = OffsetPolicy {
            init: 2,
            inc: 3,
            count: 1,
        };

        let placement = place(nodes, &small(), 1, &policy).unwrap();

        assert_eq!(offsets_of(&placement, "n0"), vec![0]);
        assert_eq!(offsets_of(&placement, "n1"), vec![2]);
        assert_eq!(offsets_of(&placement, "n2"), vec![5]);
        assert_eq!(offsets_of(&placement, "n3"), vec![8]);
    }

    #[test]
    fn complex_fails_without_backup_capacity() {
        // Two primary nodes with room for exactly one instance each.
        let nodes = vec![make_node("p1", 1, 0), make_node("p2", 1, 0)];

        let err = place(nodes, &small(), 3, &OffsetPolicy::default()).unwrap_err();

        assert_eq!(
            err,
            PlacementError::CapacityExhausted {
                remaining: 1,
                offset: 0
            }
        );
    }

    #[test]
    fn complex_simulates_capacity_across_picks() {
        let nodes = vec![make_node("p1", 2, 0), make_node("p2", 2, 0)];

        let placement = place(nodes, &small(), 4, &OffsetPolicy::default()).unwrap();

        assert_eq!(placement.strategy, Strategy::Complex);
        assert_eq!(offsets_of(&placement, "p1"), vec![0, 0]);
        assert_eq!(offsets_of(&placement, "p2"), vec![0, 0]);
        assert_eq!(placement.overscheduled, 0);
    }

    #[test]
    fn complex_overflows_to_backup_tier() {
        let nodes = vec![full_node("b1"), make_node("p1", 1, 0)];

        let placement = place(nodes, &small(), 2, &OffsetPolicy::default()).unwrap();

        assert_eq!(offsets_of(&placement, "p1"), vec![0]);
        assert_eq!(offsets_of(&placement, "b1"), vec![0]);
        assert_eq!(placement.overscheduled, 1);
    }

    #[test]
    fn complex_with_only_backup_nodes_overschedules() {
        let nodes = vec![full_node("b1"), full_node("b2")];

        let placement = place(nodes, &small(), 3, &OffsetPolicy::default()).unwrap();

        assert_eq!(placement.strategy, Strategy::Complex);
        assert_eq!(placement.wave_size(0), 3);
        assert_eq!(placement.overscheduled, 3);
        assert_eq!(offsets_of(&placement, "b1").len(), 2);
        assert_eq!(offsets_of(&placement, "b2").len(), 1);
    }

    #[test]
    fn complex_computes_each_generation() {
        let nodes = vec![make_node("p1", 2, 0), make_node("p2", 2, 0)];
        let policy = OffsetPolicy {
            init: 1,
            inc: 1,
            count: 2,
        };

        let placement = place(nodes, &small(), 2, &policy).unwrap();

        assert_eq!(offsets_of(&placement, "p1"), vec![0, 1]);
        assert_eq!(offsets_of(&placement, "p2"), vec![0, 1]);
    }

    #[test]
    fn complex_never_uses_backup_while_primary_has_room() {
        let nodes = vec![
            full_node("b1"),
            make_node("p1", 3, 0),
            make_node("p2", 1, 0),
        ];

        let placement = place(nodes, &small(), 4, &OffsetPolicy::default()).unwrap();

        assert_eq!(offsets_of(&placement, "p1").len(), 3);
        assert_eq!(offsets_of(&placement, "p2").len(), 1);
        assert!(placement.tickets.get("b1").is_none());
        assert_eq!(placement.overscheduled, 0);
    }

    #[test]
    fn zero_count_is_rejected() {
        let nodes = vec![make_node("p1", 4, 0)];
        assert_eq!(
            place(nodes, &small(), 0, &OffsetPolicy::default()).unwrap_err(),
            PlacementError::ZeroCount
        );
    }

    #[test]
    fn no_candidates_exhausts_capacity() {
        let err = place(Vec::new(), &small(), 2, &OffsetPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            PlacementError::CapacityExhausted {
                remaining: 2,
                offset: 0
            }
        );
    }

    #[test]
    fn complex_generation_stops_at_iteration_limit() {
        let nodes = vec![full_node("b1")];

        let err = place(nodes, &small(), 150, &OffsetPolicy::default()).unwrap_err();

        // One opening ticket plus COMPLEX_ITERATION_LIMIT overflow picks.
        assert_eq!(
            err,
            PlacementError::CapacityExhausted {
                remaining: 150 - 1 - COMPLEX_ITERATION_LIMIT,
                offset: 0
            }
        );
    }
}

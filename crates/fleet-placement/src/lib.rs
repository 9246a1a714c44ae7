//! Fleet placement — decides which hypervisor nodes receive a unit's tickets.
//!
//! This crate is pure computation. It never talks to the coordination
//! store: callers hand it a snapshot of candidate nodes and get back a
//! ticket assignment (`TicketsStore`) that the scheduler persists.
//!
//! # Components
//!
//! - **`capacity`** — Node capacity scratch copies (usage score, headroom check)
//! - **`placer`** — Tiering and the simple/complex ticket assignment strategies
//! - **`convert`** — Type conversions from state store types

pub mod capacity;
pub mod convert;
pub mod error;
pub mod placer;

pub use capacity::{InstanceShape, NodeCapacity};
pub use convert::{instance_to_shape, node_info_to_capacity};
pub use error::{PlacementError, PlacementResult};
pub use placer::{
    COMPLEX_ITERATION_LIMIT, OffsetPolicy, Placement, Strategy, place, process_nodes,
    schedule_complex, schedule_simple,
};

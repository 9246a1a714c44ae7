//! fleet-state — coordination store for the fleet orchestrator.
//!
//! Backed by [redb](https://docs.rs/redb), holds the node inventory, unit
//! and spec records, scheduler records, and deployment records that the
//! scheduling task and the per-node agents share.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Scheduler records use the composite key `{pod}/{unit}`.
//!
//! redb admits one write transaction at a time, so every read-check-write
//! done inside a single write transaction is an atomic conditional update.
//! The scheduler protocol (`consume_scheduler`, `record_scheduler_failure`,
//! `reserve_unit_deployment`, ...) is built entirely on that primitive; no
//! caller holds a lock across store round trips.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{NodeQuery, StateStore};
pub use types::*;

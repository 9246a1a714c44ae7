//! fleet-scheduler — placement rounds and the lock-free ticket protocol.
//!
//! A periodic [`SchedulingTask`] computes tickets for units that lack
//! deployments and persists them as one scheduler record per unit. Node
//! agents ([`TicketAgent`]) then race for those tickets through atomic
//! conditional updates in the coordination store:
//!
//! ```text
//! SchedulingTask ──schedule()──► InstanceUnit ──place()──► SchedulerRecord
//!                                                              │
//! TicketAgent (per node) ◄──── list_active_schedulers ─────────┘
//!   ├── Scheduler::consume        (consumed < count)
//!   ├── reservation::reserve      (CAS on unit count + deployments len)
//!   ├── DeployCallback
//!   └── Scheduler::failure        (unsets node tickets at the limit)
//! ```

pub mod agent;
pub mod error;
pub mod record;
pub mod reservation;
pub mod task;
pub mod unit;

pub use agent::{AgentConfig, DeployCallback, DeployFuture, DeployRequest, PollReport, TicketAgent};
pub use error::{SchedulerError, SchedulerResult};
pub use record::{DEFAULT_MAX_DEPLOYMENT_FAILURES, Scheduler};
pub use task::{SchedulingTask, TickReport};
pub use unit::{InstanceUnit, ScheduleOutcome, manual_schedule, schedule};

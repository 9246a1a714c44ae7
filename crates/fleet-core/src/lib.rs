pub mod config;

pub use config::{AgentSection, FleetConfig, HypervisorSection, NodeSection, SchedulerSection};

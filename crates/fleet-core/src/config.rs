//! fleet.toml configuration parser.
//!
//! Every section and field has a default, so an empty file is a valid
//! single-node configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub node: NodeSection,
    pub scheduler: SchedulerSection,
    pub hypervisor: HypervisorSection,
    pub agent: AgentSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Identity this daemon acts as when consuming tickets.
    pub id: String,
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
            data_dir: PathBuf::from("/var/lib/fleet"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// Offset added on the first wave advance.
    pub offset_init: u32,
    /// Offset added on every later wave advance.
    pub offset_inc: u32,
    /// Generations computed when demand meets or exceeds supply.
    pub offset_count: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            sweep_interval_secs: 30,
            offset_init: 1,
            offset_inc: 1,
            offset_count: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorSection {
    pub max_deployment_failures: u32,
}

impl Default for HypervisorSection {
    fn default() -> Self {
        Self {
            max_deployment_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub poll_interval_secs: u64,
    pub wave_delay_secs: u64,
    pub reserve_attempts: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            wave_delay_secs: 30,
            reserve_attempts: 3,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FleetConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the background loops cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be at least 1");
        }
        if self.scheduler.sweep_interval_secs == 0 {
            anyhow::bail!("scheduler.sweep_interval_secs must be at least 1");
        }
        if self.agent.poll_interval_secs == 0 {
            anyhow::bail!("agent.poll_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the coordination store database.
    pub fn state_path(&self) -> PathBuf {
        self.node.data_dir.join("fleet.redb")
    }
}

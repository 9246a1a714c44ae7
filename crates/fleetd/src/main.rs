//! fleetd — the fleet daemon.
//!
//! Single binary that assembles the scheduling subsystems:
//! - Coordination store (redb)
//! - Scheduling task + scheduler sweep
//! - Ticket agent for this node
//! - Node heartbeat
//!
//! # Usage
//!
//! ```text
//! fleetd standalone --config /etc/fleet/fleet.toml
//! fleetd schedule --config /etc/fleet/fleet.toml --unit <id> --count 2
//! ```

mod local;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use fleet_core::FleetConfig;
use fleet_placement::OffsetPolicy;
use fleet_scheduler::{AgentConfig, ScheduleOutcome, SchedulingTask, TicketAgent};
use fleet_state::{StateStore, epoch_secs};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet placement daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, the sweep and this node's ticket agent.
    Standalone {
        /// Path to fleet.toml.
        #[arg(long, default_value = "/etc/fleet/fleet.toml")]
        config: PathBuf,
    },
    /// Schedule deployments for one unit now.
    Schedule {
        /// Path to fleet.toml.
        #[arg(long, default_value = "/etc/fleet/fleet.toml")]
        config: PathBuf,

        /// Unit to schedule.
        #[arg(long)]
        unit: String,

        /// Spec revision to deploy (defaults to the unit's current spec).
        #[arg(long)]
        spec: Option<String>,

        /// Deployments to add; 0 fills the unit up to its count.
        #[arg(long, default_value = "0")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleet_scheduler=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone { config } => run_standalone(&config).await,
        Command::Schedule {
            config,
            unit,
            spec,
            count,
        } => run_schedule(&config, &unit, spec.as_deref(), count),
    }
}

fn load_config(path: &Path) -> anyhow::Result<FleetConfig> {
    if path.exists() {
        FleetConfig::from_file(path)
    } else {
        warn!(path = ?path, "config file not found, using defaults");
        Ok(FleetConfig::default())
    }
}

fn open_state(config: &FleetConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.node.data_dir)?;
    let db_path = config.state_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

fn offset_policy(config: &FleetConfig) -> OffsetPolicy {
    OffsetPolicy {
        init: config.scheduler.offset_init,
        inc: config.scheduler.offset_inc,
        count: config.scheduler.offset_count,
    }
}

fn run_schedule(
    config_path: &Path,
    unit_id: &str,
    spec_id: Option<&str>,
    count: u32,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let state = open_state(&config)?;

    let unit = state
        .get_unit(unit_id)?
        .ok_or_else(|| anyhow::anyhow!("unit not found: {unit_id}"))?;
    let outcome =
        fleet_scheduler::manual_schedule(&state, &unit, spec_id, count, &offset_policy(&config))?;

    match outcome {
        ScheduleOutcome::Scheduled {
            count,
            tickets,
            strategy,
            overscheduled,
        } => {
            info!(
                unit = %unit_id,
                count,
                tickets,
                strategy = strategy.as_str(),
                overscheduled,
                "unit scheduled"
            );
        }
        ScheduleOutcome::NoNodes {
            offline_count,
            no_mount_count,
        } => {
            anyhow::bail!(
                "no nodes available for unit {unit_id} ({offline_count} offline, {no_mount_count} missing mounts)"
            );
        }
        ScheduleOutcome::Duplicate => {
            warn!(unit = %unit_id, "another scheduler inserted this unit first");
        }
    }
    Ok(())
}

async fn run_standalone(config_path: &Path) -> anyhow::Result<()> {
    info!("fleet daemon starting in standalone mode");

    let config = load_config(config_path)?;
    let state = open_state(&config)?;

    // ── Initialize subsystems ──────────────────────────────────

    let task = SchedulingTask::new(state.clone(), offset_policy(&config));
    info!(
        interval = config.scheduler.interval_secs,
        "scheduling task initialized"
    );

    let agent_config = AgentConfig {
        node_id: config.node.id.clone(),
        max_failures: config.hypervisor.max_deployment_failures,
        wave_delay_secs: config.agent.wave_delay_secs,
        reserve_attempts: config.agent.reserve_attempts,
    };
    let instances_dir = config.node.data_dir.join("instances");
    let mut agent = TicketAgent::new(
        state.clone(),
        agent_config,
        local::deploy_callback(instances_dir),
    );
    info!(node = %config.node.id, "ticket agent initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_shutdown = shutdown_rx.clone();
    let agent_shutdown = shutdown_rx.clone();
    let heartbeat_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let interval = Duration::from_secs(config.scheduler.interval_secs);
    let sweep_interval = Duration::from_secs(config.scheduler.sweep_interval_secs);
    let task_handle = tokio::spawn(async move {
        task.run(interval, sweep_interval, task_shutdown).await;
    });

    let poll_interval = Duration::from_secs(config.agent.poll_interval_secs);
    let agent_handle = tokio::spawn(async move {
        agent.run(poll_interval, agent_shutdown).await;
    });

    let heartbeat_handle = tokio::spawn(run_heartbeat(
        state,
        config.node.id.clone(),
        poll_interval,
        heartbeat_shutdown,
    ));

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    let _ = task_handle.await;
    let _ = agent_handle.await;
    let _ = heartbeat_handle.await;

    info!("fleet daemon stopped");
    Ok(())
}

/// Keep this node's inventory record online.
async fn run_heartbeat(
    state: StateStore,
    node_id: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match state.touch_node_heartbeat(&node_id, epoch_secs()) {
            Ok(true) => {}
            Ok(false) => warn!(node = %node_id, "node not registered in inventory"),
            Err(e) => warn!(node = %node_id, error = %e, "heartbeat failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
}

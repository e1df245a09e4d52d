mod arena;
mod config;
mod link;
mod runtime;

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use experiment_core::bus::RobotId;
use experiment_core::robot::RobotController;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use arena::{ArenaConfig, SimulatedBody};
use config::RobotConfig;

#[derive(Debug, Parser)]
#[command(name = "robot-node", version, about = "Runs one simulated swarm robot")]
struct Cli {
    /// Robot id on the command bus
    #[arg(long)]
    id: Option<u16>,

    /// Command bus host
    #[arg(long)]
    host: Option<String>,

    /// Command bus port
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for placement and avoid maneuvers
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn apply(&self, mut config: RobotConfig) -> RobotConfig {
        if let Some(id) = self.id {
            config.id = id;
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config =
        cli.apply(RobotConfig::load(cli.config.as_deref()).context("loading configuration")?);
    init_tracing(&config.log_level)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime.block_on(run(config, cli.seed))
}

fn init_tracing(default_level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

async fn run(config: RobotConfig, seed: Option<u64>) -> anyhow::Result<()> {
    let id = RobotId::new(config.id);
    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut body = SimulatedBody::place(ArenaConfig::default(), &mut rng);
    let address = config.bus_address();
    let tick = config.tick_period();
    let mut controller = RobotController::new(
        id,
        config.controller,
        ChaCha8Rng::seed_from_u64(rng.next_u64()),
    );
    info!(robot = %id, seed, pose = ?body.pose(), "robot placed");

    let (mut link, receiver) = link::connect(&address, id)
        .await
        .with_context(|| format!("connecting to command bus at {address}"))?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "interrupt handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let result = runtime::run(
        &mut controller,
        &mut link,
        &mut body,
        tick,
        shutdown,
    )
    .await;
    receiver.abort();

    let ticks = result.with_context(|| format!("robot {id} control loop stopped"))?;
    info!(robot = %id, ticks, "robot stopped");
    Ok(())
}

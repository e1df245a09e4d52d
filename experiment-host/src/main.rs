mod bus;
mod config;
mod console;
mod session;
mod stimulus;
mod telemetry;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::Parser;
use experiment_core::orchestrator::{OrchestratorState, SessionPorts};
use experiment_core::trials::{SessionPreset, all_presets};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use bus::{BusPublisher, BusServer};
use config::HostConfig;
use console::{KEY_HELP, KeyboardInputs, RawModeGuard, RawStderr, StatusPrinter};
use stimulus::LoggedStimulus;
use telemetry::{ChannelTelemetry, TELEMETRY_CHANNEL_CAPACITY, TelemetryLog};

/// Time left for connection tasks to flush the final directives.
const BUS_LINGER: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "experiment-host", version, about = "Runs one robot swarm experiment session")]
struct Cli {
    /// Session preset (see --list-presets)
    #[arg(short, long, default_value = "cue-none")]
    preset: SessionPreset,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for trial generation and robot selection
    #[arg(long)]
    seed: Option<u64>,

    /// Command bus listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Number of robots in the fleet
    #[arg(long)]
    robots: Option<u16>,

    /// Write telemetry samples to this file
    #[arg(long)]
    telemetry_log: Option<PathBuf>,

    /// Run without the keyboard console
    #[arg(long)]
    headless: bool,

    /// Print the available presets and exit
    #[arg(long)]
    list_presets: bool,
}

impl Cli {
    fn apply(&self, mut config: HostConfig) -> HostConfig {
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(robots) = self.robots {
            config.robot_count = robots;
        }
        if let Some(path) = &self.telemetry_log {
            config.telemetry_log = Some(path.clone());
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_presets {
        for preset in all_presets() {
            println!("{:<22} {}", preset.name(), preset.summary());
        }
        return Ok(());
    }

    let config = cli.apply(HostConfig::load(cli.config.as_deref()).context("loading configuration")?);
    anyhow::ensure!(config.robot_count > 0, "--robots must be at least 1");
    init_tracing(&config.log_level)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let state = runtime.block_on(run(cli.preset, config, !cli.headless))?;
    info!(?state, "experiment host exiting");
    Ok(())
}

fn init_tracing(default_level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(|| RawStderr))
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

async fn run(
    preset: SessionPreset,
    config: HostConfig,
    interactive: bool,
) -> anyhow::Result<OrchestratorState> {
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(%preset, seed, robots = config.robot_count, "preparing session");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (params, schedule) =
        session::prepare(preset, &config, &mut rng).context("building trial plan")?;
    info!(
        mode = %params.mode,
        trials = schedule.timeline.len(),
        duration_s = schedule.duration.as_secs_f64(),
        "trial plan ready"
    );

    let publisher = BusPublisher::default();
    let server = BusServer::bind(config.bind, publisher.clone())
        .await
        .with_context(|| format!("binding command bus on {}", config.bind))?;
    info!(addr = %server.local_addr()?, "command bus listening");
    let accept_loop = tokio::spawn(server.serve());

    let title = format!("{preset} session, seed {seed}");
    let (tx, rx) = mpsc::channel(TELEMETRY_CHANNEL_CAPACITY);
    let writer = match config.telemetry_log {
        Some(path) => telemetry::spawn_writer(&path, &title, rx)
            .await
            .with_context(|| format!("opening telemetry log {}", path.display()))?,
        None => {
            let log = TelemetryLog::with_writer(tokio::io::sink(), &title).await?;
            tokio::spawn(async move { log.drain(rx).await.map(drop) })
        }
    };
    let mut telemetry = ChannelTelemetry::new(tx, Instant::now());

    session::idle_heartbeat(&mut telemetry, config.connect_grace).await;
    info!(subscribers = publisher.subscriber_count(), "starting session");

    let (inputs, raw_mode, mut printer) = if interactive {
        println!("{KEY_HELP}");
        let guard = RawModeGuard::enable().context("enabling raw terminal mode")?;
        (
            KeyboardInputs::interactive(),
            Some(guard),
            Some(StatusPrinter::new(io::stdout())),
        )
    } else {
        (KeyboardInputs::headless(), None, None)
    };

    let ports = SessionPorts {
        publisher,
        stimulus: LoggedStimulus::default(),
        inputs,
        telemetry,
    };
    let interrupted = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "interrupt handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let report = session::run(params, schedule, ports, rng, printer.as_mut(), interrupted).await;
    drop(raw_mode);
    let report = report?;

    info!(
        cues = report.cues_delivered,
        publish_failures = report.publish_failures,
        telemetry_dropped = report.telemetry_dropped,
        "session summary"
    );

    tokio::time::sleep(BUS_LINGER).await;
    accept_loop.abort();
    writer
        .await
        .context("telemetry writer stopped unexpectedly")?
        .context("writing telemetry log")?;
    Ok(report.state)
}

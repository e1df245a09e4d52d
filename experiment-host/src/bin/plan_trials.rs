use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use experiment_core::orchestrator::SessionSchedule;
use experiment_core::trials::SessionPreset;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[allow(dead_code)]
#[path = "../config.rs"]
mod config;

use config::HostConfig;

/// Prints the trial timeline a preset would run, without starting a session.
#[derive(Debug, Parser)]
#[command(name = "plan-trials", version)]
struct Args {
    /// Session preset
    preset: SessionPreset,

    /// Seed; the same seed reproduces the same timeline
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// TOML configuration file with plan overrides
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = HostConfig::load(args.config.as_deref()).context("loading configuration")?;
    let plan = config.plan.apply(args.preset.plan());
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let schedule = SessionSchedule::from_plan(&plan, &mut rng).context("building trial plan")?;

    println!(
        "# {} ({}), seed {}: {} trials, session {:.0} s",
        args.preset,
        args.preset.mode(),
        args.seed,
        schedule.timeline.len(),
        schedule.duration.as_secs_f64()
    );
    println!("{:>5} {:>9} {:<14} {:>6}", "trial", "offset_s", "cue", "effect");
    for (index, trial) in schedule.timeline.iter().enumerate() {
        println!(
            "{:>5} {:>9.1} {:<14} {:>6}",
            index + 1,
            trial.scheduled_offset.as_secs_f64(),
            trial.cue_type,
            trial.effect_level
        );
    }
    Ok(())
}

//! Fixed-tick session loop.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::Context;
use experiment_core::orchestrator::{
    ExperimentOrchestrator, OrchestratorState, SessionParams, SessionPorts, SessionSchedule,
};
use experiment_core::telemetry::{TELEMETRY_PERIOD, push_idle};
use experiment_core::trials::{PlanError, SessionPreset};
use rand::Rng;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::bus::BusPublisher;
use crate::config::HostConfig;
use crate::console::{KeyboardInputs, StatusPrinter};
use crate::stimulus::LoggedStimulus;
use crate::telemetry::ChannelTelemetry;

/// Orchestrator poll period.
pub const POLL_PERIOD: Duration = Duration::from_millis(1);
/// Time given to the robots to apply the fleet reset before activation.
pub const RESET_SETTLE: Duration = Duration::from_millis(500);
/// Status line refresh period.
pub const STATUS_PERIOD: Duration = Duration::from_secs(1);

pub type HostPorts = SessionPorts<BusPublisher, LoggedStimulus, KeyboardInputs, ChannelTelemetry>;

/// Summary of a finished session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionReport {
    pub state: OrchestratorState,
    pub trials_run: usize,
    pub trials_planned: usize,
    pub cues_delivered: usize,
    pub publish_failures: u32,
    pub telemetry_dropped: u64,
}

/// Resolves the protocol and timeline for `preset` under `config`.
pub fn prepare<R: Rng + ?Sized>(
    preset: SessionPreset,
    config: &HostConfig,
    rng: &mut R,
) -> Result<(SessionParams, SessionSchedule), PlanError> {
    let plan = config.plan.apply(preset.plan());
    let schedule = SessionSchedule::from_plan(&plan, rng)?;
    let params = SessionParams {
        mode: preset.mode(),
        selection: preset.selection(),
        robot_count: config.robot_count,
        timing: config.timing,
    };
    Ok((params, schedule))
}

/// Pushes the idle heartbeat every telemetry period for `duration`.
pub async fn idle_heartbeat(telemetry: &mut ChannelTelemetry, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = interval(TELEMETRY_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        push_idle(telemetry);
    }
}

/// Runs one session to a terminal state.
///
/// Resolving `shutdown` aborts the session. Console failures abort it too
/// before the error is returned, so the fleet is always switched off.
pub async fn run<R, W, F>(
    params: SessionParams,
    schedule: SessionSchedule,
    ports: HostPorts,
    rng: R,
    mut status: Option<&mut StatusPrinter<W>>,
    shutdown: F,
) -> anyhow::Result<SessionReport>
where
    R: Rng,
    W: Write,
    F: Future<Output = ()>,
{
    let trials_planned = schedule.timeline.len();
    let detection = params.mode.waits_for_detection();
    let mut orchestrator = ExperimentOrchestrator::with_components(params, schedule, ports, rng);
    if detection {
        orchestrator.reset_fleet()?;
        tokio::time::sleep(RESET_SETTLE).await;
    }

    let started_at = Instant::now();
    let mut state = orchestrator.start(started_at)?;
    let mut ticker = interval(POLL_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_status = started_at;
    tokio::pin!(shutdown);

    while !state.is_terminal() {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("interrupted, stopping the fleet");
                state = orchestrator.abort();
                break;
            }
            _ = ticker.tick() => {}
        }
        if let Err(err) = orchestrator.ports_mut().inputs.refresh() {
            orchestrator.abort();
            return Err(err).context("reading operator console");
        }

        let now = Instant::now();
        state = orchestrator.poll(now)?;

        if now >= next_status {
            next_status = now + STATUS_PERIOD;
            let line = orchestrator.status_line(now);
            if let Some(Err(err)) = status.as_mut().map(|printer| printer.show(&line)) {
                warn!(%err, "status line not shown");
            }
        }
    }

    if let Some(printer) = status.as_mut() {
        printer.finish().context("closing status line")?;
    }

    let report = SessionReport {
        state,
        trials_run: orchestrator.trial_index().min(trials_planned),
        trials_planned,
        cues_delivered: orchestrator.ports().stimulus.cues_delivered(),
        publish_failures: orchestrator.publish_failures(),
        telemetry_dropped: orchestrator.ports().telemetry.dropped(),
    };
    info!(
        state = ?report.state,
        trials = report.trials_run,
        planned = report.trials_planned,
        elapsed_s = started_at.elapsed().as_secs_f64(),
        "session finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use experiment_core::bus::{Directive, LedColor, RobotCommand};
    use experiment_core::orchestrator::{RobotSelection, SessionMode, SessionTiming};
    use experiment_core::trials::{CueType, Timeline, Trial};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::PlanOverrides;

    fn ports(publisher: BusPublisher) -> HostPorts {
        let (tx, _) = mpsc::channel(1);
        SessionPorts {
            publisher,
            stimulus: LoggedStimulus::default(),
            inputs: KeyboardInputs::headless(),
            telemetry: ChannelTelemetry::new(tx, Instant::now()),
        }
    }

    #[test]
    fn prepare_applies_config() {
        let config = HostConfig {
            robot_count: 3,
            plan: PlanOverrides {
                start_offset: Some(Duration::from_secs(5)),
                ..PlanOverrides::default()
            },
            ..HostConfig::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let (params, schedule) = prepare(SessionPreset::PipAndPopPractice, &config, &mut rng).unwrap();
        assert_eq!(params.mode, SessionMode::Paced);
        assert_eq!(params.robot_count, 3);
        assert_eq!(schedule.timeline.len(), 16);
        assert_eq!(
            schedule.timeline.get(0).map(|trial| trial.scheduled_offset),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn short_paced_session_reaches_completion() {
        let publisher = BusPublisher::new(64);
        let mut rx = publisher.subscribe();
        let (tx, mut samples) = mpsc::channel(1_024);

        let timing = SessionTiming {
            stop_offset: Duration::from_millis(5),
            stop_duration: Duration::from_millis(30),
            ..SessionTiming::default()
        };
        let schedule = SessionSchedule {
            timeline: Timeline::from_trials(vec![Trial::new(
                Duration::from_millis(10),
                CueType::Audio,
                1,
            )]),
            duration: Duration::from_millis(80),
        };
        let params = SessionParams {
            mode: SessionMode::Paced,
            selection: RobotSelection::PerTrial,
            robot_count: 2,
            timing,
        };
        let ports = SessionPorts {
            publisher,
            stimulus: LoggedStimulus::default(),
            inputs: KeyboardInputs::headless(),
            telemetry: ChannelTelemetry::new(tx, Instant::now()),
        };

        let report = run(
            params,
            schedule,
            ports,
            ChaCha8Rng::seed_from_u64(5),
            None::<&mut StatusPrinter<Vec<u8>>>,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(report.state, OrchestratorState::Completed);
        assert_eq!(report.trials_run, 1);
        assert_eq!(report.cues_delivered, 1);

        let mut directives = Vec::new();
        while let Ok(directive) = rx.try_recv() {
            directives.push(directive);
        }
        assert_eq!(directives.first(), Some(&Directive::All(RobotCommand::On)));
        assert!(matches!(directives[1], Directive::Robot(_, RobotCommand::Pause)));
        assert!(matches!(directives[2], Directive::Robot(_, RobotCommand::Go)));
        assert_eq!(
            &directives[3..],
            &[Directive::All(RobotCommand::Off), Directive::Led(LedColor::Off)]
        );

        samples.close();
        let mut count = 0;
        while samples.recv().await.is_some() {
            count += 1;
        }
        assert!(count > 0, "periodic telemetry was pushed");
    }

    #[tokio::test]
    async fn interrupt_switches_the_fleet_off() {
        let publisher = BusPublisher::new(64);
        let mut rx = publisher.subscribe();
        let schedule = SessionSchedule {
            timeline: Timeline::from_trials(vec![Trial::new(
                Duration::from_secs(30),
                CueType::None,
                1,
            )]),
            duration: Duration::from_secs(60),
        };
        let params = SessionParams {
            mode: SessionMode::Paced,
            selection: RobotSelection::PerTrial,
            robot_count: 2,
            timing: SessionTiming::default(),
        };

        let report = run(
            params,
            schedule,
            ports(publisher),
            ChaCha8Rng::seed_from_u64(9),
            None::<&mut StatusPrinter<Vec<u8>>>,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        assert_eq!(report.state, OrchestratorState::Aborted);
        assert_eq!(report.trials_run, 0);

        let mut directives = Vec::new();
        while let Ok(directive) = rx.try_recv() {
            directives.push(directive);
        }
        assert_eq!(
            directives,
            vec![
                Directive::All(RobotCommand::On),
                Directive::All(RobotCommand::Off),
                Directive::Led(LedColor::Off),
            ]
        );
    }
}

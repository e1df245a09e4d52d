use core::ops::Add;
use core::time::Duration;

use experiment_core::bus::{Directive, LedColor, RobotCommand};
use experiment_core::clock::SessionInstant;
use experiment_core::orchestrator::{
    DigitalInputs, ExperimentOrchestrator, OrchestratorState, RobotSelection, SessionMode,
    SessionParams, SessionPorts, SessionSchedule, SessionTiming, Signal, StimulusSink,
};
use experiment_core::telemetry::{TelemetryRecorder, TelemetrySink, TelemetryStream};
use experiment_core::trials::{CueType, SessionPreset, Timeline, Trial};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn cue_audio_session_runs_to_completion() {
    let preset = SessionPreset::CueAudio;
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let schedule = SessionSchedule::from_plan(&preset.plan(), &mut rng).expect("plan is valid");
    assert_eq!(schedule.timeline.len(), 12);
    assert_eq!(schedule.duration, Duration::from_secs(180));

    let params = SessionParams {
        mode: preset.mode(),
        selection: preset.selection(),
        robot_count: 6,
        timing: SessionTiming::default(),
    };
    let offsets: Vec<Duration> = schedule.timeline.iter().map(|t| t.scheduled_offset).collect();
    let mut session = ExperimentOrchestrator::with_components(
        params,
        schedule,
        SessionPorts {
            publisher: Vec::new(),
            stimulus: RecordingStimulus::default(),
            inputs: ScriptedInputs::default(),
            telemetry: CountingTelemetry::default(),
        },
        ChaCha8Rng::seed_from_u64(8),
    );

    session.start(MockInstant::millis(0)).expect("session starts");
    let log = run(&mut session, 200_000);

    assert_eq!(session.state(), OrchestratorState::Completed);
    let (finished_at, _) = log.last().copied().expect("directives were published");
    assert_eq!(finished_at, 180_001);

    let directives: Vec<Directive> = session.ports().publisher.clone();
    assert_eq!(directives.first(), Some(&Directive::All(RobotCommand::On)));
    assert_eq!(
        &directives[directives.len() - 2..],
        &[Directive::All(RobotCommand::Off), Directive::Led(LedColor::Off)]
    );
    let offs = directives
        .iter()
        .filter(|d| **d == Directive::All(RobotCommand::Off))
        .count();
    assert_eq!(offs, 1, "the fleet is turned off exactly once");

    let pauses: Vec<(u64, Directive)> = log
        .iter()
        .copied()
        .filter(|(_, d)| matches!(d, Directive::Robot(_, RobotCommand::Pause)))
        .collect();
    let goes: Vec<(u64, Directive)> = log
        .iter()
        .copied()
        .filter(|(_, d)| matches!(d, Directive::Robot(_, RobotCommand::Go)))
        .collect();
    assert_eq!(pauses.len(), 12);
    assert_eq!(goes.len(), 12);

    for ((offset, (paused_at, pause)), (resumed_at, go)) in offsets.iter().zip(&pauses).zip(&goes) {
        let offset_ms = u64::try_from(offset.as_millis()).unwrap();
        assert_eq!(*paused_at, offset_ms + 20);
        assert_eq!(*resumed_at, offset_ms + 5_020);
        let (Directive::Robot(paused, _), Directive::Robot(resumed, _)) = (pause, go) else {
            unreachable!();
        };
        assert_eq!(paused, resumed, "the paused robot is the one released");
        assert!(paused.get() < 6);
    }

    let stimulus = &session.ports().stimulus;
    assert_eq!(stimulus.cues.len(), 12);
    assert!(stimulus.cues.iter().all(|(cue, level)| *cue == CueType::Audio && *level == 1));
    assert_eq!(stimulus.background, vec![true, false]);

    let telemetry = &session.ports().telemetry;
    assert_eq!(telemetry.robot_ids, 12);
    assert!(
        (17_990..=18_010).contains(&telemetry.robot_states),
        "robot_state cadence was {}",
        telemetry.robot_states
    );
}

#[test]
fn catch_trial_cues_without_pausing() {
    let timeline = Timeline::from_trials(vec![
        Trial::new(Duration::from_secs(1), CueType::AudioTactile, 0),
        Trial::new(Duration::from_secs(7), CueType::Tactile, 1),
    ]);
    let mut session = paced(timeline, Duration::from_secs(20));
    session.start(MockInstant::millis(0)).unwrap();

    let log = run(&mut session, 1_100);
    assert!(log.is_empty(), "catch trials publish nothing: {log:?}");
    assert_eq!(
        session.ports().telemetry.latest_on(TelemetryStream::RobotState),
        Some(2)
    );
    assert_eq!(
        session.ports().telemetry.latest_on(TelemetryStream::CueState),
        Some(CueType::AudioTactile.state_code())
    );
    assert_eq!(
        session.ports().telemetry.latest_on(TelemetryStream::StopState),
        Some(1)
    );

    let log = run_from(&mut session, 1_101, 6_100);
    assert!(log.is_empty());
    assert_eq!(
        session.ports().telemetry.latest_on(TelemetryStream::RobotState),
        Some(0)
    );
    assert_eq!(session.ports().stimulus.cues, vec![(CueType::AudioTactile, 0)]);

    let log = run_from(&mut session, 6_101, 7_100);
    assert_eq!(log.len(), 1);
    assert!(matches!(log[0], (7_020, Directive::Robot(_, RobotCommand::Pause))));
}

#[test]
fn stop_input_aborts_and_turns_fleet_off() {
    let timeline = Timeline::from_trials(vec![Trial::new(
        Duration::from_secs(1),
        CueType::Audio,
        1,
    )]);
    let mut session = paced(timeline, Duration::from_secs(31));
    session.start(MockInstant::millis(0)).unwrap();

    run(&mut session, 2_000);
    assert!(session.paused_robot().is_some());

    session.ports_mut().inputs.stop_at = Some(2_001);
    let log = run_from(&mut session, 2_001, 3_000);

    assert_eq!(session.state(), OrchestratorState::Aborted);
    assert_eq!(
        log,
        vec![
            (2_001, Directive::All(RobotCommand::Off)),
            (2_001, Directive::Led(LedColor::Off)),
        ]
    );
    assert_eq!(session.paused_robot(), None);
    assert_eq!(session.ports().stimulus.background, vec![true, false]);
}

#[test]
fn elapsed_tracks_wall_clock_in_paced_mode() {
    let timeline = Timeline::from_trials(vec![Trial::new(
        Duration::from_secs(1),
        CueType::None,
        1,
    )]);
    let mut session = paced(timeline, Duration::from_secs(31));
    session.start(MockInstant::millis(100)).unwrap();

    run_from(&mut session, 101, 3_100);
    assert_eq!(session.elapsed(), Duration::from_secs(3));
    assert!(session.paused_robot().is_some());
    assert_eq!(session.ports().stimulus.cues, vec![(CueType::None, 1)]);
}

type PacedSession = ExperimentOrchestrator<
    MockInstant,
    Vec<Directive>,
    RecordingStimulus,
    ScriptedInputs,
    TelemetryRecorder,
    ChaCha8Rng,
>;

fn paced(timeline: Timeline, duration: Duration) -> PacedSession {
    ExperimentOrchestrator::with_components(
        SessionParams {
            mode: SessionMode::Paced,
            selection: RobotSelection::PerTrial,
            robot_count: 3,
            timing: SessionTiming::default(),
        },
        SessionSchedule { timeline, duration },
        SessionPorts {
            publisher: Vec::new(),
            stimulus: RecordingStimulus::default(),
            inputs: ScriptedInputs::default(),
            telemetry: TelemetryRecorder::new(),
        },
        ChaCha8Rng::seed_from_u64(3),
    )
}

fn run<S, T>(
    session: &mut ExperimentOrchestrator<MockInstant, Vec<Directive>, S, ScriptedInputs, T, ChaCha8Rng>,
    until_ms: u64,
) -> Vec<(u64, Directive)>
where
    S: StimulusSink,
    T: TelemetrySink,
{
    run_from(session, 1, until_ms)
}

/// Polls once per millisecond, timestamping every directive published.
fn run_from<S, T>(
    session: &mut ExperimentOrchestrator<MockInstant, Vec<Directive>, S, ScriptedInputs, T, ChaCha8Rng>,
    from_ms: u64,
    until_ms: u64,
) -> Vec<(u64, Directive)>
where
    S: StimulusSink,
    T: TelemetrySink,
{
    let mut log = Vec::new();
    for now in from_ms..=until_ms {
        let before = session.ports().publisher.len();
        session.ports_mut().inputs.now = now;
        let state = session.poll(MockInstant::millis(now)).expect("session running");
        log.extend(
            session.ports().publisher[before..]
                .iter()
                .map(|directive| (now, *directive)),
        );
        if state.is_terminal() {
            break;
        }
    }
    log
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MockInstant(u64);

impl MockInstant {
    fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_micros()).unwrap())
    }
}

impl SessionInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Default)]
struct ScriptedInputs {
    now: u64,
    stop_at: Option<u64>,
}

impl DigitalInputs for ScriptedInputs {
    fn read(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Stop => self.stop_at.is_some_and(|at| self.now >= at),
            _ => false,
        }
    }
}

#[derive(Default)]
struct RecordingStimulus {
    cues: Vec<(CueType, u8)>,
    background: Vec<bool>,
}

impl StimulusSink for RecordingStimulus {
    fn emit(&mut self, cue: CueType, effect_level: u8) {
        self.cues.push((cue, effect_level));
    }

    fn background(&mut self, enabled: bool) {
        self.background.push(enabled);
    }
}

#[derive(Default)]
struct CountingTelemetry {
    robot_states: usize,
    robot_ids: usize,
}

impl TelemetrySink for CountingTelemetry {
    fn push(&mut self, stream: TelemetryStream, _sample: i32) {
        match stream {
            TelemetryStream::RobotState => self.robot_states += 1,
            TelemetryStream::RobotId => self.robot_ids += 1,
            _ => {}
        }
    }
}

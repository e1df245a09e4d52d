//! Experiment orchestration state machine.
//!
//! One [`ExperimentOrchestrator`] owns the state of one session: the
//! timeline, the trial cursor, the paused robot and the clock baseline. The
//! host calls [`ExperimentOrchestrator::poll`] from a fixed-tick loop; each
//! call reads the operator inputs once, advances the current trial by at most
//! one phase, pushes telemetry when due and reports the lifecycle state.
//!
//! Paced sessions pause a robot for a fixed window after each cue and never
//! stop the clock. Detection sessions pause a robot at the cue, freeze the
//! session clock until the participant reports the pause, and afterwards
//! move the baseline forward by the time spent in the trial.

use core::fmt;
use core::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{Directive, DirectivePublisher, LedColor, RobotCommand, RobotId};
use crate::clock::SessionInstant;
use crate::telemetry::{
    TelemetryCadence, TelemetryFrame, TelemetrySink, TelemetryStream, UserInputMask,
};
use crate::trials::{
    CueType, EffectBounds, PlanError, Timeline, Trial, TrialPlan, generate, serde_secs,
};

pub mod response;
pub mod status;

pub use response::{Response, ResponseOutcome, classify};
pub use status::StatusLine;

/// `robot_state` while no robot is held.
pub const ROBOT_STATE_IDLE: i32 = 0;
/// `robot_state` while a robot is paused.
pub const ROBOT_STATE_PAUSED: i32 = 1;
/// `robot_state` during a paced catch trial.
pub const ROBOT_STATE_CATCH: i32 = 2;

/// Effect level of a paced trial that cues without pausing any robot.
pub const CATCH_EFFECT_LEVEL: u8 = 0;

/// Trial protocol run by the orchestrator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Fixed pause window after each cue, free-running clock.
    Paced,
    /// Detection, confirmation hold, then a short/long response window.
    Timed,
    /// Detection with immediate short/long feedback and no response window.
    Training,
}

impl SessionMode {
    #[must_use]
    pub const fn waits_for_detection(self) -> bool {
        matches!(self, SessionMode::Timed | SessionMode::Training)
    }

    #[must_use]
    pub const fn with_response_window(self) -> bool {
        matches!(self, SessionMode::Timed)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionMode::Paced => "paced",
            SessionMode::Timed => "timed",
            SessionMode::Training => "training",
        };
        f.write_str(label)
    }
}

/// How the paused robot is chosen.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RobotSelection {
    /// Activate the whole fleet and draw a robot for every trial.
    PerTrial,
    /// Draw one robot at start, activate only it and reuse it for every trial.
    Single,
}

/// Operator and participant inputs sampled each poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    Stop,
    UserDetect,
    UserShortResponse,
    UserLongResponse,
}

/// Level-triggered digital inputs.
pub trait DigitalInputs {
    /// Returns `true` while `signal` is asserted.
    fn read(&mut self, signal: Signal) -> bool;
}

impl<D: DigitalInputs + ?Sized> DigitalInputs for &mut D {
    fn read(&mut self, signal: Signal) -> bool {
        (**self).read(signal)
    }
}

/// Sounds played back to the participant outside of trial cues.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Feedback {
    /// Training: the hold was the shortest one.
    Short,
    /// Training: the hold was the longest one.
    Long,
    Correct,
    Incorrect,
}

/// Delivers cues and feedback to the participant.
pub trait StimulusSink {
    /// Delivers the cue for a trial. `CueType::None` must produce no stimulus.
    fn emit(&mut self, cue: CueType, effect_level: u8);

    fn feedback(&mut self, _feedback: Feedback) {}

    /// Starts or stops the background masking noise.
    fn background(&mut self, _enabled: bool) {}
}

impl<S: StimulusSink + ?Sized> StimulusSink for &mut S {
    fn emit(&mut self, cue: CueType, effect_level: u8) {
        (**self).emit(cue, effect_level);
    }

    fn feedback(&mut self, feedback: Feedback) {
        (**self).feedback(feedback);
    }

    fn background(&mut self, enabled: bool) {
        (**self).background(enabled);
    }
}

/// Stimulus sink that performs no output.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullStimulus;

impl StimulusSink for NullStimulus {
    fn emit(&mut self, _: CueType, _: u8) {}
}

/// Timing constants of the trial protocols.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    /// Paced: delay between the cue and the pause.
    #[serde(with = "serde_secs")]
    pub stop_offset: Duration,
    /// Paced: how long the robot stays paused.
    #[serde(with = "serde_secs")]
    pub stop_duration: Duration,
    /// Detection: hold after detection for effect level zero.
    #[serde(with = "serde_secs")]
    pub confirm_base: Duration,
    /// Detection: additional hold per effect level.
    #[serde(with = "serde_secs")]
    pub confirm_step: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            stop_offset: Duration::from_millis(20),
            stop_duration: Duration::from_secs(5),
            confirm_base: Duration::from_millis(200),
            confirm_step: Duration::from_millis(100),
        }
    }
}

impl SessionTiming {
    /// Hold applied after detection before the robot resumes.
    #[must_use]
    pub fn confirmation_hold(&self, effect_level: u8) -> Duration {
        self.confirm_base + self.confirm_step * u32::from(effect_level)
    }
}

/// Protocol selection for one session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionParams {
    pub mode: SessionMode,
    pub selection: RobotSelection,
    /// Robots in the fleet; ids are drawn from `0..robot_count`.
    pub robot_count: u16,
    pub timing: SessionTiming,
}

/// Timeline plus the wall-clock bound of the session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionSchedule {
    pub timeline: Timeline,
    pub duration: Duration,
}

impl SessionSchedule {
    /// Generates the timeline for `plan` and derives the session length.
    ///
    /// # Errors
    ///
    /// Propagates [`PlanError`] from the generator.
    pub fn from_plan<R: Rng + ?Sized>(plan: &TrialPlan, rng: &mut R) -> Result<Self, PlanError> {
        let timeline = generate(plan, rng)?;
        let duration = plan.session_duration(&timeline);
        Ok(Self { timeline, duration })
    }
}

/// Collaborators the orchestrator drives.
pub struct SessionPorts<B, S, D, T> {
    pub publisher: B,
    pub stimulus: S,
    pub inputs: D,
    pub telemetry: T,
}

/// Session lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OrchestratorState {
    Idle,
    Running,
    Completed,
    Aborted,
    /// The timeline was empty; nothing was published.
    Skipped,
}

impl OrchestratorState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, OrchestratorState::Running)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestratorState::Completed | OrchestratorState::Aborted | OrchestratorState::Skipped
        )
    }
}

/// Progress of the current trial.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrialPhase {
    /// Waiting for the trial offset.
    Armed,
    /// Paced: cue delivered, waiting for the stop offset.
    CueEmitted,
    /// A robot is paused (or a catch trial is running).
    RobotPaused,
    /// Detection reported; holding the pause for the confirmation interval.
    Confirming,
    /// Waiting for the short/long response.
    AwaitingResponse,
    /// Every trial has been run.
    Resolved,
}

/// Lifecycle misuse reported by the orchestrator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("session has not been started")]
    NotStarted,
    #[error("session already left the idle state ({0:?})")]
    AlreadyStarted(OrchestratorState),
    #[error("robot fleet is empty")]
    NoRobots,
}

#[derive(Copy, Clone, Debug, Default)]
struct InputLevels {
    stop: bool,
    detect: bool,
    short: bool,
    long: bool,
}

impl InputLevels {
    fn sample<D: DigitalInputs + ?Sized>(inputs: &mut D) -> Self {
        Self {
            stop: inputs.read(Signal::Stop),
            detect: inputs.read(Signal::UserDetect),
            short: inputs.read(Signal::UserShortResponse),
            long: inputs.read(Signal::UserLongResponse),
        }
    }

    const fn mask(self) -> UserInputMask {
        UserInputMask::from_levels(self.detect, self.short, self.long)
    }

    const fn response(self) -> Option<Response> {
        match (self.short, self.long) {
            (true, false) => Some(Response::Short),
            (false, true) => Some(Response::Long),
            _ => None,
        }
    }
}

/// Session state machine for one experiment run.
pub struct ExperimentOrchestrator<TInstant, B, S, D, T, R> {
    params: SessionParams,
    schedule: SessionSchedule,
    bounds: Option<EffectBounds>,
    ports: SessionPorts<B, S, D, T>,
    rng: R,
    state: OrchestratorState,
    phase: TrialPhase,
    trial_index: usize,
    baseline: Option<TInstant>,
    elapsed: Duration,
    in_trial: bool,
    bound_robot: Option<RobotId>,
    paused_robot: Option<RobotId>,
    pause_started: Option<TInstant>,
    confirm_until: Option<TInstant>,
    last_outcome: Option<ResponseOutcome>,
    frame: TelemetryFrame,
    cadence: TelemetryCadence<TInstant>,
    publish_failures: u32,
}

impl<TInstant, B, S, D, T, R> ExperimentOrchestrator<TInstant, B, S, D, T, R>
where
    TInstant: SessionInstant,
    B: DirectivePublisher,
    S: StimulusSink,
    D: DigitalInputs,
    T: TelemetrySink,
    R: Rng,
{
    /// Creates an idle orchestrator that owns its collaborators.
    #[must_use]
    pub fn with_components(
        params: SessionParams,
        schedule: SessionSchedule,
        ports: SessionPorts<B, S, D, T>,
        rng: R,
    ) -> Self {
        let bounds = schedule.timeline.effect_bounds();
        Self {
            params,
            schedule,
            bounds,
            ports,
            rng,
            state: OrchestratorState::Idle,
            phase: TrialPhase::Armed,
            trial_index: 0,
            baseline: None,
            elapsed: Duration::ZERO,
            in_trial: false,
            bound_robot: None,
            paused_robot: None,
            pause_started: None,
            confirm_until: None,
            last_outcome: None,
            frame: TelemetryFrame::default(),
            cadence: TelemetryCadence::default(),
            publish_failures: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> OrchestratorState {
        self.state
    }

    #[must_use]
    pub const fn phase(&self) -> TrialPhase {
        self.phase
    }

    #[must_use]
    pub const fn params(&self) -> &SessionParams {
        &self.params
    }

    #[must_use]
    pub const fn trial_index(&self) -> usize {
        self.trial_index
    }

    /// Session time used for trial offsets; frozen inside detection trials.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub const fn timeline(&self) -> &Timeline {
        &self.schedule.timeline
    }

    #[must_use]
    pub const fn session_duration(&self) -> Duration {
        self.schedule.duration
    }

    #[must_use]
    pub const fn paused_robot(&self) -> Option<RobotId> {
        self.paused_robot
    }

    /// Robot bound for the whole session under [`RobotSelection::Single`].
    #[must_use]
    pub const fn bound_robot(&self) -> Option<RobotId> {
        self.bound_robot
    }

    #[must_use]
    pub const fn last_outcome(&self) -> Option<ResponseOutcome> {
        self.last_outcome
    }

    /// Directives the publisher refused during this session.
    #[must_use]
    pub const fn publish_failures(&self) -> u32 {
        self.publish_failures
    }

    #[must_use]
    pub const fn ports(&self) -> &SessionPorts<B, S, D, T> {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut SessionPorts<B, S, D, T> {
        &mut self.ports
    }

    /// Consumes the orchestrator and hands back its collaborators.
    #[must_use]
    pub fn into_ports(self) -> SessionPorts<B, S, D, T> {
        self.ports
    }

    /// Console progress line for `now`.
    #[must_use]
    pub fn status_line(&self, now: TInstant) -> StatusLine {
        if !self.state.is_active() {
            return StatusLine::Idle;
        }
        let in_trial_for = self
            .pause_started
            .map_or(Duration::ZERO, |started| now.saturating_duration_since(started));
        match self.phase {
            TrialPhase::RobotPaused | TrialPhase::Confirming
                if self.params.mode.waits_for_detection() =>
            {
                StatusLine::AwaitingDetection(in_trial_for)
            }
            TrialPhase::AwaitingResponse => StatusLine::ResponseWindow(in_trial_for),
            _ => StatusLine::Elapsed(self.elapsed),
        }
    }

    /// Activates the robots and starts the session clock.
    ///
    /// An empty timeline skips the session without publishing anything.
    ///
    /// # Errors
    ///
    /// Fails when the session was already started or the fleet is empty.
    pub fn start(&mut self, now: TInstant) -> Result<OrchestratorState, OrchestratorError> {
        if self.state != OrchestratorState::Idle {
            return Err(OrchestratorError::AlreadyStarted(self.state));
        }
        if self.params.robot_count == 0 {
            return Err(OrchestratorError::NoRobots);
        }
        if self.schedule.timeline.is_empty() {
            warn!(mode = %self.params.mode, "timeline is empty, skipping session");
            self.state = OrchestratorState::Skipped;
            self.phase = TrialPhase::Resolved;
            return Ok(self.state);
        }

        self.baseline = Some(now);
        self.elapsed = Duration::ZERO;
        self.frame = TelemetryFrame::default();
        self.cadence.reset();
        self.ports.stimulus.background(true);

        match self.params.selection {
            RobotSelection::PerTrial => self.publish(Directive::All(RobotCommand::On)),
            RobotSelection::Single => {
                let id = self.draw_robot();
                self.bound_robot = Some(id);
                self.publish(Directive::Robot(id, RobotCommand::On));
            }
        }

        self.state = OrchestratorState::Running;
        info!(
            mode = %self.params.mode,
            trials = self.schedule.timeline.len(),
            duration_s = self.schedule.duration.as_secs_f64(),
            robot = ?self.bound_robot,
            "session started"
        );
        Ok(self.state)
    }

    /// Switches every robot off and clears the LEDs ahead of [`start`].
    ///
    /// Clears a robot left paused or lit by an earlier, interrupted session.
    /// The caller should give the robots a control tick or more to apply the
    /// `off` before starting, or a queued `on` can land in the same tick.
    ///
    /// # Errors
    ///
    /// Fails once the session has left the idle state.
    ///
    /// [`start`]: Self::start
    pub fn reset_fleet(&mut self) -> Result<(), OrchestratorError> {
        if self.state != OrchestratorState::Idle {
            return Err(OrchestratorError::AlreadyStarted(self.state));
        }
        debug!("resetting fleet");
        self.publish(Directive::All(RobotCommand::Off));
        self.publish(Directive::Led(LedColor::Off));
        Ok(())
    }

    /// Runs one iteration of the session loop.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotStarted`] when called before [`start`].
    /// Terminal states are returned as `Ok` on every later call.
    ///
    /// [`start`]: Self::start
    pub fn poll(&mut self, now: TInstant) -> Result<OrchestratorState, OrchestratorError> {
        match self.state {
            OrchestratorState::Running => {}
            OrchestratorState::Idle => return Err(OrchestratorError::NotStarted),
            terminal => return Ok(terminal),
        }

        let levels = InputLevels::sample(&mut self.ports.inputs);
        if levels.stop {
            info!(elapsed_s = self.elapsed.as_secs_f64(), "session stopped by operator");
            self.finish(OrchestratorState::Aborted);
            return Ok(self.state);
        }

        let frozen = self.params.mode.waits_for_detection() && self.in_trial;
        if let Some(baseline) = self.baseline.filter(|_| !frozen) {
            self.elapsed = now.saturating_duration_since(baseline);
        }

        if self.params.mode.waits_for_detection() {
            self.step_detection(now, levels);
        } else {
            self.step_paced(now);
        }

        if self.cadence.poll(now) {
            self.frame.user_input = levels.mask();
            self.frame.publish(&mut self.ports.telemetry);
        }

        if self.elapsed > self.schedule.duration {
            info!(elapsed_s = self.elapsed.as_secs_f64(), "session complete");
            self.finish(OrchestratorState::Completed);
        }
        Ok(self.state)
    }

    /// Operator stop issued outside of [`poll`](Self::poll).
    pub fn abort(&mut self) -> OrchestratorState {
        if self.state.is_active() {
            info!(elapsed_s = self.elapsed.as_secs_f64(), "session aborted");
            self.finish(OrchestratorState::Aborted);
        }
        self.state
    }

    fn current_trial(&self) -> Option<Trial> {
        self.schedule.timeline.get(self.trial_index).copied()
    }

    fn step_paced(&mut self, now: TInstant) {
        let Some(trial) = self.current_trial() else {
            return;
        };
        let timing = self.params.timing;
        let pause_at = trial.scheduled_offset + timing.stop_offset;

        match self.phase {
            TrialPhase::Armed if self.elapsed >= trial.scheduled_offset => {
                self.emit_cue(&trial);
                self.phase = TrialPhase::CueEmitted;
            }
            TrialPhase::CueEmitted if self.elapsed >= pause_at => {
                if trial.effect_level == CATCH_EFFECT_LEVEL {
                    debug!(trial = self.trial_index, "catch trial, no robot paused");
                    self.frame.robot_state = ROBOT_STATE_CATCH;
                } else {
                    let id = self.select_robot();
                    self.pause_robot(id, now);
                }
                self.phase = TrialPhase::RobotPaused;
            }
            TrialPhase::RobotPaused if self.elapsed >= pause_at + timing.stop_duration => {
                self.release_robot();
                self.advance();
            }
            _ => {}
        }
    }

    fn step_detection(&mut self, now: TInstant, levels: InputLevels) {
        let Some(trial) = self.current_trial() else {
            return;
        };

        match self.phase {
            TrialPhase::Armed if self.elapsed >= trial.scheduled_offset => {
                self.emit_cue(&trial);
                let id = self.select_robot();
                self.pause_robot(id, now);
                self.in_trial = true;
                self.phase = TrialPhase::RobotPaused;
            }
            TrialPhase::RobotPaused if levels.detect => {
                if self.params.mode == SessionMode::Training {
                    self.training_feedback(&trial);
                }
                let hold = self.params.timing.confirmation_hold(trial.effect_level);
                debug!(trial = self.trial_index, hold_ms = hold.as_millis(), "pause detected");
                self.confirm_until = Some(now + hold);
                self.phase = TrialPhase::Confirming;
            }
            TrialPhase::Confirming if self.confirm_until.is_some_and(|until| now >= until) => {
                self.confirm_until = None;
                self.release_robot();
                if self.params.mode.with_response_window() {
                    self.publish(Directive::Led(LedColor::White));
                    self.phase = TrialPhase::AwaitingResponse;
                } else {
                    self.resolve_trial(now);
                }
            }
            TrialPhase::AwaitingResponse => {
                if let Some(response) = levels.response() {
                    self.score(&trial, response);
                    self.resolve_trial(now);
                }
            }
            _ => {}
        }
    }

    fn emit_cue(&mut self, trial: &Trial) {
        debug!(
            trial = self.trial_index,
            cue = %trial.cue_type,
            effect = trial.effect_level,
            "cue"
        );
        self.ports.stimulus.emit(trial.cue_type, trial.effect_level);
        self.frame.cue_state = trial.cue_type.state_code();
        self.frame.stop_state = trial.stop_state_code();
    }

    fn pause_robot(&mut self, id: RobotId, now: TInstant) {
        self.publish(Directive::Robot(id, RobotCommand::Pause));
        self.ports
            .telemetry
            .push(TelemetryStream::RobotId, id.telemetry_code());
        self.frame.robot_state = ROBOT_STATE_PAUSED;
        self.paused_robot = Some(id);
        self.pause_started = Some(now);
    }

    fn release_robot(&mut self) {
        if let Some(id) = self.paused_robot.take() {
            self.publish(Directive::Robot(id, RobotCommand::Go));
        }
        self.frame.robot_state = ROBOT_STATE_IDLE;
        self.frame.cue_state = 0;
        self.frame.stop_state = 0;
    }

    fn training_feedback(&mut self, trial: &Trial) {
        let Some(bounds) = self.bounds else {
            return;
        };
        if trial.effect_level == bounds.min {
            self.ports.stimulus.feedback(Feedback::Short);
        } else if trial.effect_level == bounds.max {
            self.ports.stimulus.feedback(Feedback::Long);
        }
    }

    fn score(&mut self, trial: &Trial, response: Response) {
        let Some(bounds) = self.bounds else {
            return;
        };
        let outcome = classify(trial.effect_level, bounds, response);
        info!(
            trial = self.trial_index,
            effect = trial.effect_level,
            ?response,
            ?outcome,
            "response"
        );
        match outcome {
            ResponseOutcome::Correct => {
                self.ports.stimulus.feedback(Feedback::Correct);
                self.publish(Directive::Led(LedColor::Green));
            }
            ResponseOutcome::Incorrect => {
                self.ports.stimulus.feedback(Feedback::Incorrect);
                self.publish(Directive::Led(LedColor::Red));
            }
            ResponseOutcome::Unscored => {}
        }
        self.last_outcome = Some(outcome);
    }

    fn resolve_trial(&mut self, now: TInstant) {
        self.publish(Directive::Led(LedColor::Off));
        if let (Some(baseline), Some(started)) = (self.baseline, self.pause_started) {
            let spent = now.saturating_duration_since(started);
            self.baseline = Some(baseline + spent);
        }
        self.pause_started = None;
        self.in_trial = false;
        self.advance();
    }

    fn advance(&mut self) {
        self.trial_index += 1;
        self.pause_started = None;
        self.phase = if self.trial_index < self.schedule.timeline.len() {
            TrialPhase::Armed
        } else {
            TrialPhase::Resolved
        };
    }

    fn select_robot(&mut self) -> RobotId {
        match (self.params.selection, self.bound_robot) {
            (RobotSelection::Single, Some(id)) => id,
            _ => self.draw_robot(),
        }
    }

    fn draw_robot(&mut self) -> RobotId {
        RobotId(self.rng.gen_range(0..self.params.robot_count))
    }

    fn finish(&mut self, outcome: OrchestratorState) {
        self.publish(Directive::All(RobotCommand::Off));
        self.publish(Directive::Led(LedColor::Off));
        self.ports.stimulus.background(false);
        self.paused_robot = None;
        self.confirm_until = None;
        self.in_trial = false;
        self.frame = TelemetryFrame::default();
        self.state = outcome;
    }

    fn publish(&mut self, directive: Directive) {
        debug!(%directive, "publish");
        if let Err(err) = self.ports.publisher.publish(&directive) {
            self.publish_failures = self.publish_failures.saturating_add(1);
            warn!(%directive, %err, "directive not published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullTelemetry;
    use core::ops::Add;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

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
    struct Levels {
        stop: bool,
    }

    impl DigitalInputs for Levels {
        fn read(&mut self, signal: Signal) -> bool {
            matches!(signal, Signal::Stop) && self.stop
        }
    }

    type TestOrchestrator = ExperimentOrchestrator<
        MockInstant,
        Vec<Directive>,
        NullStimulus,
        Levels,
        NullTelemetry,
        ChaCha8Rng,
    >;

    fn orchestrator(timeline: Timeline, duration: Duration, robot_count: u16) -> TestOrchestrator {
        ExperimentOrchestrator::with_components(
            SessionParams {
                mode: SessionMode::Paced,
                selection: RobotSelection::PerTrial,
                robot_count,
                timing: SessionTiming::default(),
            },
            SessionSchedule { timeline, duration },
            SessionPorts {
                publisher: Vec::new(),
                stimulus: NullStimulus,
                inputs: Levels::default(),
                telemetry: NullTelemetry,
            },
            ChaCha8Rng::seed_from_u64(0),
        )
    }

    fn one_trial() -> Timeline {
        Timeline::from_trials(vec![Trial::new(Duration::from_secs(1), CueType::None, 1)])
    }

    #[test]
    fn poll_before_start_is_rejected() {
        let mut session = orchestrator(one_trial(), Duration::from_secs(10), 3);
        assert_eq!(
            session.poll(MockInstant::millis(0)),
            Err(OrchestratorError::NotStarted)
        );
    }

    #[test]
    fn empty_fleet_cannot_start() {
        let mut session = orchestrator(one_trial(), Duration::from_secs(10), 0);
        assert_eq!(
            session.start(MockInstant::millis(0)),
            Err(OrchestratorError::NoRobots)
        );
    }

    #[test]
    fn empty_timeline_skips_without_publishing() {
        let mut session = orchestrator(Timeline::default(), Duration::from_secs(10), 3);
        assert_eq!(
            session.start(MockInstant::millis(0)),
            Ok(OrchestratorState::Skipped)
        );
        assert!(session.ports().publisher.is_empty());
        assert_eq!(
            session.poll(MockInstant::millis(5)),
            Ok(OrchestratorState::Skipped)
        );
    }

    #[test]
    fn second_start_is_rejected() {
        let mut session = orchestrator(one_trial(), Duration::from_secs(10), 3);
        session.start(MockInstant::millis(0)).unwrap();
        assert_eq!(
            session.start(MockInstant::millis(1)),
            Err(OrchestratorError::AlreadyStarted(OrchestratorState::Running))
        );
    }

    #[test]
    fn explicit_abort_turns_fleet_off_once() {
        let mut session = orchestrator(one_trial(), Duration::from_secs(10), 3);
        session.start(MockInstant::millis(0)).unwrap();
        assert_eq!(session.abort(), OrchestratorState::Aborted);
        assert_eq!(session.abort(), OrchestratorState::Aborted);

        let published = &session.ports().publisher;
        assert_eq!(
            published.as_slice(),
            &[
                Directive::All(RobotCommand::On),
                Directive::All(RobotCommand::Off),
                Directive::Led(LedColor::Off),
            ]
        );
    }

    #[test]
    fn fleet_reset_precedes_activation_only() {
        let mut session = orchestrator(one_trial(), Duration::from_secs(10), 3);
        session.reset_fleet().unwrap();
        session.start(MockInstant::millis(500)).unwrap();
        assert_eq!(
            session.reset_fleet(),
            Err(OrchestratorError::AlreadyStarted(OrchestratorState::Running))
        );

        assert_eq!(
            session.ports().publisher.as_slice(),
            &[
                Directive::All(RobotCommand::Off),
                Directive::Led(LedColor::Off),
                Directive::All(RobotCommand::On),
            ]
        );
    }

    #[test]
    fn confirmation_hold_scales_with_effect() {
        let timing = SessionTiming::default();
        assert_eq!(timing.confirmation_hold(0), Duration::from_millis(200));
        assert_eq!(timing.confirmation_hold(6), Duration::from_millis(800));
    }
}

//! Per-robot reactive controller.
//!
//! Each robot runs a small wander policy: drive forward, turn in place away
//! from obstacles, and back off when a ground sensor sees the arena border.
//! Bus directives switch the robot on or off and impose pauses. The policy
//! is evaluated once per control tick by [`RobotController::tick`]; the
//! surrounding I/O and the motor fail-safe live in
//! [`RobotController::drive_once`].

use core::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::bus::{BusError, Directive, DirectiveSource, LedColor, RobotCommand, RobotId};
use crate::clock::SessionInstant;
use crate::trials::serde_secs;

pub mod hardware;

pub use hardware::{
    Actuator, ActuatorSink, HardwareError, MAX_CHANNELS, Readings, SensorFrame, SensorGroup,
    SensorSource, apply_led,
};

/// Directives applied per tick at most, so a flooded link cannot stall the loop.
pub const MAX_DIRECTIVES_PER_TICK: usize = 16;

/// Tunables of the wander policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Wheel speed used for every maneuver.
    pub speed: i32,
    /// Proximity reading above which an obstacle is present.
    pub obstacle_threshold: i32,
    /// Ground reflectance below which the sensor is over a line.
    pub line_threshold: i32,
    #[serde(with = "serde_secs")]
    pub back_duration: Duration,
    #[serde(with = "serde_secs")]
    pub avoid_min: Duration,
    #[serde(with = "serde_secs")]
    pub avoid_max: Duration,
    /// Leading horizontal sensors treated as forward-facing.
    pub front_sensors: usize,
    /// Trailing horizontal sensors treated as rear-facing.
    pub rear_sensors: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speed: 250,
            obstacle_threshold: 1000,
            line_threshold: 300,
            back_duration: Duration::from_secs(1),
            avoid_min: Duration::from_millis(500),
            avoid_max: Duration::from_millis(1500),
            front_sensors: 5,
            rear_sensors: 2,
        }
    }
}

impl ControllerConfig {
    fn front_obstacle(&self, frame: &SensorFrame) -> bool {
        let front = self.front_sensors.min(frame.horizontal.len());
        exceeds(&frame.horizontal[..front], self.obstacle_threshold)
    }

    fn rear_obstacle(&self, frame: &SensorFrame) -> bool {
        let start = frame.horizontal.len().saturating_sub(self.rear_sensors);
        exceeds(&frame.horizontal[start..], self.obstacle_threshold)
    }

    fn line_side(&self, frame: &SensorFrame) -> Option<RotationSign> {
        match frame.ground.as_slice() {
            [left, ..] if *left < self.line_threshold => Some(RotationSign::Left),
            [_, right, ..] if *right < self.line_threshold => Some(RotationSign::Right),
            _ => None,
        }
    }
}

fn exceeds(values: &[i32], threshold: i32) -> bool {
    values.iter().any(|value| *value > threshold)
}

/// Power state set by `on`/`off` directives.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Off,
    On,
}

/// Current maneuver.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Action {
    #[default]
    Stop,
    Go,
    Avoid,
    Back,
    Pause,
}

impl Action {
    /// Returns `true` when the motors are held at zero.
    #[must_use]
    pub const fn is_stationary(self) -> bool {
        matches!(self, Action::Stop | Action::Pause)
    }
}

/// Direction of an in-place turn.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RotationSign {
    #[default]
    Left,
    Right,
}

impl RotationSign {
    #[must_use]
    pub const fn factor(self) -> i32 {
        match self {
            RotationSign::Left => 1,
            RotationSign::Right => -1,
        }
    }
}

/// Deadline of a timed maneuver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActionTimer<TInstant> {
    pub started_at: TInstant,
    pub duration: Duration,
}

impl<TInstant: SessionInstant> ActionTimer<TInstant> {
    #[must_use]
    pub fn has_elapsed(&self, now: TInstant) -> bool {
        now.saturating_duration_since(self.started_at) > self.duration
    }
}

/// Wheel targets produced by one tick.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MotorCommand {
    pub left: i32,
    pub right: i32,
}

impl MotorCommand {
    pub const HALT: Self = Self { left: 0, right: 0 };

    #[must_use]
    pub const fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }
}

/// Faults that terminate the control loop.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Reactive controller for one robot.
pub struct RobotController<TInstant, R> {
    id: RobotId,
    config: ControllerConfig,
    mode: Mode,
    action: Action,
    timer: Option<ActionTimer<TInstant>>,
    rotation: RotationSign,
    led: LedColor,
    led_pending: bool,
    rng: R,
}

impl<TInstant, R> RobotController<TInstant, R>
where
    TInstant: SessionInstant,
    R: Rng,
{
    #[must_use]
    pub fn new(id: RobotId, config: ControllerConfig, rng: R) -> Self {
        Self {
            id,
            config,
            mode: Mode::Off,
            action: Action::Stop,
            timer: None,
            rotation: RotationSign::Left,
            led: LedColor::Off,
            led_pending: false,
            rng,
        }
    }

    #[must_use]
    pub const fn id(&self) -> RobotId {
        self.id
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub const fn rotation(&self) -> RotationSign {
        self.rotation
    }

    #[must_use]
    pub const fn led(&self) -> LedColor {
        self.led
    }

    #[must_use]
    pub const fn timer(&self) -> Option<&ActionTimer<TInstant>> {
        self.timer.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Applies one directive. Returns `false` when it was addressed elsewhere.
    pub fn apply(&mut self, directive: &Directive) -> bool {
        match *directive {
            Directive::All(command) => self.apply_command(command),
            Directive::Robot(id, command) if id == self.id => self.apply_command(command),
            Directive::Robot(..) => return false,
            Directive::Led(color) => {
                if color != self.led {
                    self.led = color;
                    self.led_pending = true;
                }
            }
        }
        true
    }

    fn apply_command(&mut self, command: RobotCommand) {
        match command {
            RobotCommand::On => self.set_mode(Mode::On),
            RobotCommand::Off => self.set_mode(Mode::Off),
            RobotCommand::Pause => {
                self.timer = None;
                self.set_action(Action::Pause);
            }
            RobotCommand::Go => {
                self.timer = None;
                self.set_action(Action::Go);
            }
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            info!(robot = %self.id, ?mode, "mode changed");
            self.mode = mode;
        }
    }

    fn set_action(&mut self, action: Action) {
        if self.action != action {
            debug!(robot = %self.id, from = ?self.action, to = ?action, "action changed");
            self.action = action;
        }
    }

    /// Evaluates the transition policy for one tick and returns motor targets.
    pub fn tick(&mut self, now: TInstant, frame: &SensorFrame) -> MotorCommand {
        match self.mode {
            Mode::Off => {
                self.timer = None;
                self.set_action(Action::Stop);
            }
            Mode::On => {
                self.react(now, frame);
                self.expire_timer(now);
            }
        }
        self.motor_command()
    }

    fn react(&mut self, now: TInstant, frame: &SensorFrame) {
        match self.action {
            Action::Stop => self.set_action(Action::Go),
            Action::Pause => self.timer = None,
            Action::Go => {
                if self.config.front_obstacle(frame) {
                    let sign = self.random_sign();
                    self.start_avoid(now, sign);
                } else if let Some(sign) = self.config.line_side(frame) {
                    self.start_back(now, sign);
                }
            }
            Action::Back => {
                if self.config.rear_obstacle(frame) {
                    let sign = self.random_sign();
                    self.start_avoid(now, sign);
                }
            }
            Action::Avoid => {}
        }
    }

    fn expire_timer(&mut self, now: TInstant) {
        let Some(timer) = self.timer else {
            return;
        };
        if !timer.has_elapsed(now) {
            return;
        }
        if self.action == Action::Back {
            self.start_avoid(now, self.rotation);
        } else {
            self.timer = None;
            self.set_action(Action::Go);
        }
    }

    fn start_avoid(&mut self, now: TInstant, sign: RotationSign) {
        let duration = self.avoid_duration();
        self.rotation = sign;
        self.timer = Some(ActionTimer {
            started_at: now,
            duration,
        });
        self.set_action(Action::Avoid);
    }

    fn start_back(&mut self, now: TInstant, sign: RotationSign) {
        self.rotation = sign;
        self.timer = Some(ActionTimer {
            started_at: now,
            duration: self.config.back_duration,
        });
        self.set_action(Action::Back);
    }

    fn random_sign(&mut self) -> RotationSign {
        if self.rng.gen_bool(0.5) {
            RotationSign::Left
        } else {
            RotationSign::Right
        }
    }

    fn avoid_duration(&mut self) -> Duration {
        let min = self.config.avoid_min;
        let max = self.config.avoid_max;
        if max <= min {
            return min;
        }
        Duration::from_secs_f64(self.rng.gen_range(min.as_secs_f64()..max.as_secs_f64()))
    }

    /// Motor targets for the current action.
    #[must_use]
    pub fn motor_command(&self) -> MotorCommand {
        let speed = self.config.speed;
        match self.action {
            Action::Go => MotorCommand::new(speed, speed),
            Action::Avoid => {
                let sign = self.rotation.factor();
                MotorCommand::new(sign * speed, -sign * speed)
            }
            Action::Back => MotorCommand::new(-speed, -speed),
            Action::Stop | Action::Pause => MotorCommand::HALT,
        }
    }

    /// Samples sensors, ticks the policy and writes LED and motor targets.
    ///
    /// # Errors
    ///
    /// Propagates the first sensor or actuator fault.
    pub fn run_tick<S, A>(
        &mut self,
        now: TInstant,
        sensors: &mut S,
        actuators: &mut A,
    ) -> Result<MotorCommand, HardwareError>
    where
        S: SensorSource + ?Sized,
        A: ActuatorSink + ?Sized,
    {
        let frame = SensorFrame::sample(sensors)?;
        let command = self.tick(now, &frame);
        if self.led_pending {
            apply_led(actuators, self.led)?;
            self.led_pending = false;
        }
        actuators.set(Actuator::MotorLeft, &[command.left])?;
        actuators.set(Actuator::MotorRight, &[command.right])?;
        Ok(command)
    }

    /// Drains pending directives and runs one tick, halting the motors on any fault.
    ///
    /// # Errors
    ///
    /// Returns the fault after both motors were commanded to zero. Callers
    /// must treat it as fatal and leave the control loop.
    pub fn drive_once<B, S, A>(
        &mut self,
        now: TInstant,
        bus: &mut B,
        sensors: &mut S,
        actuators: &mut A,
    ) -> Result<MotorCommand, ControllerError>
    where
        B: DirectiveSource + ?Sized,
        S: SensorSource + ?Sized,
        A: ActuatorSink + ?Sized,
    {
        let result = self
            .drain(bus)
            .and_then(|()| self.run_tick(now, sensors, actuators).map_err(Into::into));

        if let Err(fault) = &result {
            error!(robot = %self.id, %fault, "control loop fault, halting motors");
            self.timer = None;
            self.action = Action::Stop;
            if let Err(halt_fault) = halt(actuators) {
                error!(robot = %self.id, %halt_fault, "failed to halt motors");
            }
        }
        result
    }

    fn drain<B: DirectiveSource + ?Sized>(&mut self, bus: &mut B) -> Result<(), ControllerError> {
        for _ in 0..MAX_DIRECTIVES_PER_TICK {
            let Some(directive) = bus.try_next()? else {
                break;
            };
            if self.apply(&directive) {
                debug!(robot = %self.id, %directive, "directive applied");
            }
        }
        Ok(())
    }
}

/// Forces both motors to zero.
///
/// Both writes are attempted even if the first fails.
///
/// # Errors
///
/// Returns the first rejected write.
pub fn halt<A: ActuatorSink + ?Sized>(actuators: &mut A) -> Result<(), HardwareError> {
    let left = actuators.set(Actuator::MotorLeft, &[0]);
    let right = actuators.set(Actuator::MotorRight, &[0]);
    left.and(right)
}

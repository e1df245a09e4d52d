//! Simulated robot body.
//!
//! A differential-drive robot in a square arena whose floor is light except
//! for a dark band along the walls. Proximity sensors see the walls within a
//! short range, ground sensors see the band, and motor targets move the body
//! when [`SimulatedBody::advance`] integrates them.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::Duration;

use experiment_core::robot::{
    Actuator, ActuatorSink, HardwareError, MAX_CHANNELS, Readings, SensorGroup, SensorSource,
};
use rand::Rng;

/// Proximity reading at contact.
pub const PROX_MAX: i32 = 4500;
/// Ground reflectance over the light floor.
pub const FLOOR_LIGHT: i32 = 900;
/// Ground reflectance over the border band.
pub const FLOOR_DARK: i32 = 120;

/// Metres per second for one unit of motor target.
const SPEED_SCALE: f64 = 0.2 / 500.0;
const WHEEL_BASE: f64 = 0.095;
const BODY_RADIUS: f64 = 0.055;
/// Forward and lateral offset of the ground sensors from the centre.
const GROUND_OFFSET: (f64, f64) = (0.07, 0.01);

/// Bearings of the horizontal sensors relative to the heading, counter-clockwise.
/// Five front sensors from left to right, then rear left and rear right.
const PROX_BEARINGS: [f64; 7] = [0.7, 0.35, 0.0, -0.35, -0.7, PI - 0.35, -PI + 0.35];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ArenaConfig {
    /// Side of the square arena in metres.
    pub size: f64,
    /// Width of the dark band along the walls.
    pub border: f64,
    /// Distance at which proximity sensors start to respond.
    pub prox_range: f64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            size: 1.5,
            border: 0.04,
            prox_range: 0.12,
        }
    }
}

impl ArenaConfig {
    /// Free distance from `(x, y)` to the wall along `angle`.
    fn wall_distance(&self, x: f64, y: f64, angle: f64) -> f64 {
        let (sin, cos) = angle.sin_cos();
        let along = |position: f64, direction: f64| {
            if direction > f64::EPSILON {
                (self.size - position) / direction
            } else if direction < -f64::EPSILON {
                -position / direction
            } else {
                f64::INFINITY
            }
        };
        along(x, cos).min(along(y, sin))
    }

    fn on_border(&self, x: f64, y: f64) -> bool {
        let nearest = x.min(y).min(self.size - x).min(self.size - y);
        nearest < self.border
    }
}

/// Position in metres and heading in radians.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

pub struct SimulatedBody {
    arena: ArenaConfig,
    pose: Pose,
    targets: HashMap<Actuator, Readings>,
}

impl SimulatedBody {
    #[must_use]
    pub fn with_pose(arena: ArenaConfig, pose: Pose) -> Self {
        Self {
            arena,
            pose,
            targets: HashMap::new(),
        }
    }

    /// Places the robot at a random pose clear of the border band.
    pub fn place<R: Rng + ?Sized>(arena: ArenaConfig, rng: &mut R) -> Self {
        let margin = arena.border + arena.prox_range + BODY_RADIUS;
        let span = (arena.size - 2.0 * margin).max(0.0);
        let pose = Pose {
            x: margin + rng.gen_range(0.0..=span),
            y: margin + rng.gen_range(0.0..=span),
            heading: rng.gen_range(-PI..PI),
        };
        Self::with_pose(arena, pose)
    }

    #[must_use]
    pub const fn pose(&self) -> Pose {
        self.pose
    }

    /// Last values written to `actuator`.
    #[must_use]
    pub fn target(&self, actuator: Actuator) -> Option<&[i32]> {
        self.targets.get(&actuator).map(Readings::as_slice)
    }

    /// Integrates the current motor targets over `dt`.
    pub fn advance(&mut self, dt: Duration) {
        let left = f64::from(self.motor(Actuator::MotorLeft)) * SPEED_SCALE;
        let right = f64::from(self.motor(Actuator::MotorRight)) * SPEED_SCALE;
        let secs = dt.as_secs_f64();
        let forward = (left + right) / 2.0;
        let turn = (right - left) / WHEEL_BASE;

        let heading = self.pose.heading + turn * secs;
        let low = BODY_RADIUS;
        let high = self.arena.size - BODY_RADIUS;
        self.pose = Pose {
            x: (self.pose.x + forward * heading.cos() * secs).clamp(low, high),
            y: (self.pose.y + forward * heading.sin() * secs).clamp(low, high),
            heading: (heading + PI).rem_euclid(2.0 * PI) - PI,
        };
    }

    fn motor(&self, actuator: Actuator) -> i32 {
        self.target(actuator)
            .and_then(|values| values.first().copied())
            .unwrap_or(0)
    }

    /// Borrows the sensor and actuator sides separately so both can be
    /// handed to the controller in the same call.
    pub fn split(&mut self) -> (BodySensors<'_>, BodyActuators<'_>) {
        (
            BodySensors {
                arena: &self.arena,
                pose: &self.pose,
            },
            BodyActuators {
                targets: &mut self.targets,
            },
        )
    }
}

pub struct BodySensors<'a> {
    arena: &'a ArenaConfig,
    pose: &'a Pose,
}

impl BodySensors<'_> {
    #[allow(clippy::cast_possible_truncation)]
    fn proximity(&self, bearing: f64) -> i32 {
        let Pose { x, y, heading } = *self.pose;
        let gap = (self.arena.wall_distance(x, y, heading + bearing) - BODY_RADIUS).max(0.0);
        if gap >= self.arena.prox_range {
            return 0;
        }
        (f64::from(PROX_MAX) * (1.0 - gap / self.arena.prox_range)).round() as i32
    }

    fn ground(&self, lateral: f64) -> i32 {
        let Pose { x, y, heading } = *self.pose;
        let (sin, cos) = heading.sin_cos();
        let (forward, _) = GROUND_OFFSET;
        let sensor_x = x + forward * cos - lateral * sin;
        let sensor_y = y + forward * sin + lateral * cos;
        if self.arena.on_border(sensor_x, sensor_y) {
            FLOOR_DARK
        } else {
            FLOOR_LIGHT
        }
    }
}

impl SensorSource for BodySensors<'_> {
    fn read(&mut self, group: SensorGroup) -> Result<Readings, HardwareError> {
        let (_, lateral) = GROUND_OFFSET;
        Ok(match group {
            SensorGroup::ProxHorizontal => PROX_BEARINGS
                .iter()
                .map(|bearing| self.proximity(*bearing))
                .collect(),
            SensorGroup::GroundReflected => [self.ground(lateral), self.ground(-lateral)]
                .into_iter()
                .collect(),
        })
    }
}

pub struct BodyActuators<'a> {
    targets: &'a mut HashMap<Actuator, Readings>,
}

impl ActuatorSink for BodyActuators<'_> {
    fn set(&mut self, actuator: Actuator, values: &[i32]) -> Result<(), HardwareError> {
        let motor = matches!(actuator, Actuator::MotorLeft | Actuator::MotorRight);
        if values.is_empty() || values.len() > MAX_CHANNELS || (motor && values.len() != 1) {
            return Err(HardwareError::ActuatorRejected(actuator));
        }
        self.targets
            .insert(actuator, values.iter().copied().collect());
        Ok(())
    }
}

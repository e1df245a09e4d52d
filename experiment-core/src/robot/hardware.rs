//! Sensor and actuator boundary of a robot node.
//!
//! The controller never talks to the robot body directly. It reads sensor
//! groups through [`SensorSource`] and writes targets through
//! [`ActuatorSink`], so the same policy runs against real hardware bindings
//! and the simulated body used on the host.

use core::fmt;

use heapless::Vec;
use thiserror::Error;

use crate::bus::LedColor;

/// Largest channel count of any sensor or actuator group.
pub const MAX_CHANNELS: usize = 8;

/// Samples read from one sensor group.
pub type Readings = Vec<i32, MAX_CHANNELS>;

/// Brightness used for every lit LED channel.
pub const LED_LEVEL: i32 = 32;

/// Sensor groups exposed by the robot body.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SensorGroup {
    /// Seven horizontal proximity sensors: five front, two rear.
    ProxHorizontal,
    /// Two downward reflectance sensors: left then right.
    GroundReflected,
}

impl SensorGroup {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SensorGroup::ProxHorizontal => "prox.horizontal",
            SensorGroup::GroundReflected => "prox.ground.reflected",
        }
    }

    /// Channel count the controller expects from this group.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            SensorGroup::ProxHorizontal => 7,
            SensorGroup::GroundReflected => 2,
        }
    }
}

impl fmt::Display for SensorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writable targets on the robot body.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Actuator {
    MotorLeft,
    MotorRight,
    LedTop,
    LedBottomLeft,
    LedBottomRight,
    LedCircle,
}

impl Actuator {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Actuator::MotorLeft => "motor.left.target",
            Actuator::MotorRight => "motor.right.target",
            Actuator::LedTop => "leds.top",
            Actuator::LedBottomLeft => "leds.bottom.left",
            Actuator::LedBottomRight => "leds.bottom.right",
            Actuator::LedCircle => "leds.circle",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Faults raised by the hardware boundary.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum HardwareError {
    #[error("sensor group {0} is unavailable")]
    SensorUnavailable(SensorGroup),
    #[error("sensor group {group} returned {got} channels, expected {expected}")]
    ShortRead {
        group: SensorGroup,
        expected: usize,
        got: usize,
    },
    #[error("actuator {0} rejected the write")]
    ActuatorRejected(Actuator),
    #[error("robot link lost")]
    LinkLost,
}

/// Read-only access to the robot's sensors.
pub trait SensorSource {
    /// Reads every channel of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError`] when the group cannot be read.
    fn read(&mut self, group: SensorGroup) -> Result<Readings, HardwareError>;
}

/// Write-only access to the robot's motors and LEDs.
pub trait ActuatorSink {
    /// Writes `values` to `actuator`.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError`] when the write is rejected.
    fn set(&mut self, actuator: Actuator, values: &[i32]) -> Result<(), HardwareError>;
}

impl<S: SensorSource + ?Sized> SensorSource for &mut S {
    fn read(&mut self, group: SensorGroup) -> Result<Readings, HardwareError> {
        (**self).read(group)
    }
}

impl<A: ActuatorSink + ?Sized> ActuatorSink for &mut A {
    fn set(&mut self, actuator: Actuator, values: &[i32]) -> Result<(), HardwareError> {
        (**self).set(actuator, values)
    }
}

/// Sensor groups sampled once per control tick.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SensorFrame {
    pub horizontal: Readings,
    pub ground: Readings,
}

impl SensorFrame {
    /// Reads both groups, rejecting short reads.
    ///
    /// # Errors
    ///
    /// Propagates source failures and returns [`HardwareError::ShortRead`]
    /// when a group reports fewer channels than expected.
    pub fn sample<S: SensorSource + ?Sized>(source: &mut S) -> Result<Self, HardwareError> {
        Ok(Self {
            horizontal: read_checked(source, SensorGroup::ProxHorizontal)?,
            ground: read_checked(source, SensorGroup::GroundReflected)?,
        })
    }

    /// Builds a frame from raw slices, truncating anything past [`MAX_CHANNELS`].
    #[must_use]
    pub fn from_slices(horizontal: &[i32], ground: &[i32]) -> Self {
        Self {
            horizontal: horizontal.iter().copied().take(MAX_CHANNELS).collect(),
            ground: ground.iter().copied().take(MAX_CHANNELS).collect(),
        }
    }
}

fn read_checked<S: SensorSource + ?Sized>(
    source: &mut S,
    group: SensorGroup,
) -> Result<Readings, HardwareError> {
    let readings = source.read(group)?;
    if readings.len() < group.channels() {
        return Err(HardwareError::ShortRead {
            group,
            expected: group.channels(),
            got: readings.len(),
        });
    }
    Ok(readings)
}

/// Writes the LED pattern for `color`.
///
/// Off clears every group including the circle; white lights every group;
/// the remaining colours only touch the top and bottom groups.
///
/// # Errors
///
/// Propagates the first rejected write.
pub fn apply_led<A: ActuatorSink + ?Sized>(
    actuators: &mut A,
    color: LedColor,
) -> Result<(), HardwareError> {
    let rgb = match color {
        LedColor::Off => [0, 0, 0],
        LedColor::White => [LED_LEVEL, LED_LEVEL, LED_LEVEL],
        LedColor::Green => [0, LED_LEVEL, 0],
        LedColor::Red => [LED_LEVEL, 0, 0],
        LedColor::Blue => [0, 0, LED_LEVEL],
    };
    for actuator in [
        Actuator::LedTop,
        Actuator::LedBottomLeft,
        Actuator::LedBottomRight,
    ] {
        actuators.set(actuator, &rgb)?;
    }
    match color {
        LedColor::Off => actuators.set(Actuator::LedCircle, &[0; 8]),
        LedColor::White => actuators.set(Actuator::LedCircle, &[LED_LEVEL; 8]),
        _ => Ok(()),
    }
}

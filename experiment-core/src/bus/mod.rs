//! Command bus protocol shared by the orchestrator and robot nodes.
//!
//! Directives travel as single text lines of the form `<topic> <command>`.
//! They are decoded exactly once at the transport boundary into the closed
//! [`Directive`] enum; everything past that point works with typed values.

use core::fmt;

use heapless::Vec;
use thiserror::Error;

pub mod grammar;

pub use grammar::{ParseError, parse_directive, parse_subscription};

/// Maximum number of topics a single subscriber may declare.
pub const MAX_SUBSCRIPTION_TOPICS: usize = 4;

/// Identifier of one robot in the fleet (0-based).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RobotId(pub u16);

impl RobotId {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Value pushed on the `robot_id` telemetry stream (1-based).
    #[must_use]
    pub const fn telemetry_code(self) -> i32 {
        self.0 as i32 + 1
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command word addressed to `all` or to a single robot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RobotCommand {
    On,
    Off,
    Pause,
    Go,
}

impl RobotCommand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RobotCommand::On => "on",
            RobotCommand::Off => "off",
            RobotCommand::Pause => "pause",
            RobotCommand::Go => "go",
        }
    }
}

impl fmt::Display for RobotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator colour shown on every robot's LEDs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum LedColor {
    #[default]
    Off,
    White,
    Green,
    Red,
    Blue,
}

impl LedColor {
    #[must_use]
    pub const fn as_index(self) -> u8 {
        match self {
            LedColor::Off => 0,
            LedColor::White => 1,
            LedColor::Green => 2,
            LedColor::Red => 3,
            LedColor::Blue => 4,
        }
    }

    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(LedColor::Off),
            1 => Some(LedColor::White),
            2 => Some(LedColor::Green),
            3 => Some(LedColor::Red),
            4 => Some(LedColor::Blue),
            _ => None,
        }
    }
}

/// Topic a directive is published on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Topic {
    All,
    Robot(RobotId),
    Led,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => f.write_str("all"),
            Topic::Robot(id) => write!(f, "{id}"),
            Topic::Led => f.write_str("led"),
        }
    }
}

/// Decoded bus message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Directive {
    All(RobotCommand),
    Robot(RobotId, RobotCommand),
    Led(LedColor),
}

impl Directive {
    #[must_use]
    pub const fn topic(self) -> Topic {
        match self {
            Directive::All(_) => Topic::All,
            Directive::Robot(id, _) => Topic::Robot(id),
            Directive::Led(_) => Topic::Led,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::All(command) => write!(f, "all {command}"),
            Directive::Robot(id, command) => write!(f, "{id} {command}"),
            Directive::Led(color) => write!(f, "led {}", color.as_index()),
        }
    }
}

/// Exact-match topic filter declared by a subscriber.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subscription {
    topics: Vec<Topic, MAX_SUBSCRIPTION_TOPICS>,
}

impl Subscription {
    /// Subscription that only receives `all` traffic.
    #[must_use]
    pub fn broadcast_only() -> Self {
        let mut topics = Vec::new();
        let _ = topics.push(Topic::All);
        Self { topics }
    }

    /// Topics a robot listens to: `all`, its own id and `led`.
    #[must_use]
    pub fn for_robot(id: RobotId) -> Self {
        let mut subscription = Self::broadcast_only();
        subscription.insert(Topic::Robot(id));
        subscription.insert(Topic::Led);
        subscription
    }

    /// Adds a topic; duplicates and topics beyond capacity are ignored.
    pub fn insert(&mut self, topic: Topic) -> bool {
        if self.topics.contains(&topic) {
            return false;
        }
        self.topics.push(topic).is_ok()
    }

    #[must_use]
    pub fn accepts(&self, directive: &Directive) -> bool {
        self.topics.contains(&directive.topic())
    }

    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("subscribe")?;
        for topic in &self.topics {
            write!(f, " {topic}")?;
        }
        Ok(())
    }
}

/// Transport failures surfaced by bus endpoints.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BusError {
    #[error("command bus disconnected")]
    Disconnected,
    #[error("command bus transport error: {0}")]
    Transport(String),
}

/// Fire-and-forget sender of directives.
pub trait DirectivePublisher {
    /// Publishes one directive. Delivery is best-effort and unacknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the transport can no longer accept messages.
    fn publish(&mut self, directive: &Directive) -> Result<(), BusError>;
}

/// Non-blocking receiver of directives.
pub trait DirectiveSource {
    /// Returns the next pending directive, or `None` when nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the transport has failed.
    fn try_next(&mut self) -> Result<Option<Directive>, BusError>;
}

impl<P: DirectivePublisher + ?Sized> DirectivePublisher for &mut P {
    fn publish(&mut self, directive: &Directive) -> Result<(), BusError> {
        (**self).publish(directive)
    }
}

impl<S: DirectiveSource + ?Sized> DirectiveSource for &mut S {
    fn try_next(&mut self) -> Result<Option<Directive>, BusError> {
        (**self).try_next()
    }
}

/// Recording publisher, used when replaying sessions without a transport.
impl DirectivePublisher for std::vec::Vec<Directive> {
    fn publish(&mut self, directive: &Directive) -> Result<(), BusError> {
        self.push(*directive);
        Ok(())
    }
}

impl DirectiveSource for std::collections::VecDeque<Directive> {
    fn try_next(&mut self) -> Result<Option<Directive>, BusError> {
        Ok(self.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_render_as_topic_and_command() {
        assert_eq!(Directive::All(RobotCommand::On).to_string(), "all on");
        assert_eq!(
            Directive::Robot(RobotId(7), RobotCommand::Pause).to_string(),
            "7 pause"
        );
        assert_eq!(Directive::Led(LedColor::Red).to_string(), "led 3");
    }

    #[test]
    fn robot_subscription_filters_by_exact_topic() {
        let subscription = Subscription::for_robot(RobotId(3));

        assert!(subscription.accepts(&Directive::All(RobotCommand::Off)));
        assert!(subscription.accepts(&Directive::Robot(RobotId(3), RobotCommand::Go)));
        assert!(subscription.accepts(&Directive::Led(LedColor::White)));
        assert!(!subscription.accepts(&Directive::Robot(RobotId(4), RobotCommand::Go)));
        assert!(!Subscription::broadcast_only().accepts(&Directive::Led(LedColor::Green)));
    }

    #[test]
    fn subscription_ignores_duplicate_topics() {
        let mut subscription = Subscription::for_robot(RobotId(1));
        assert!(!subscription.insert(Topic::All));
        assert_eq!(subscription.topics().len(), 3);
        assert_eq!(subscription.to_string(), "subscribe all 1 led");
    }

    #[test]
    fn robot_id_telemetry_is_one_based() {
        assert_eq!(RobotId(0).telemetry_code(), 1);
        assert_eq!(RobotId(9).telemetry_code(), 10);
    }
}

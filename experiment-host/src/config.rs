//! Host configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `EXPERIMENT_*` environment variables (`__` separates nested keys, e.g.
//! `EXPERIMENT_TIMING__STOP_DURATION=3.5`). Command-line flags are applied
//! last by `main`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use experiment_core::orchestrator::SessionTiming;
use experiment_core::trials::{IntervalRange, PlanError, TrialPlan, serde_secs};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of the environment variables read by the host.
pub const ENV_PREFIX: &str = "EXPERIMENT_";
/// TCP port the command bus listens on by default.
pub const DEFAULT_BUS_PORT: u16 = 5556;

const DEFAULT_ROBOT_COUNT: u16 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("robot_count must be at least 1")]
    NoRobots,
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Settings of the controller process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address the command bus listens on.
    pub bind: SocketAddr,
    /// Robots in the fleet; ids `0..robot_count` are eligible for pauses.
    pub robot_count: u16,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Telemetry sample log; telemetry is discarded when unset.
    pub telemetry_log: Option<PathBuf>,
    /// Seed for trial generation and robot selection.
    pub seed: Option<u64>,
    /// Idle time after binding so robots can subscribe before the session.
    #[serde(with = "serde_secs")]
    pub connect_grace: Duration,
    pub timing: SessionTiming,
    pub plan: PlanOverrides,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_BUS_PORT)),
            robot_count: DEFAULT_ROBOT_COUNT,
            log_level: "info".to_owned(),
            telemetry_log: None,
            seed: None,
            connect_grace: Duration::from_secs(3),
            timing: SessionTiming::default(),
            plan: PlanOverrides::default(),
        }
    }
}

impl HostConfig {
    /// Layered provider chain for `path`.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(missing) = path.filter(|path| !path.exists()) {
            return Err(ConfigError::Missing(missing.to_path_buf()));
        }
        Self::extract(&Self::figment(path))
    }

    pub fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.robot_count == 0 {
            return Err(ConfigError::NoRobots);
        }
        if let Some(interval) = self.plan.interval {
            interval.validate()?;
        }
        Ok(())
    }
}

/// Optional replacements for the timing fields of a preset's plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOverrides {
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<Duration>,
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<Duration>,
    /// Session length of duration-driven presets.
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
}

impl PlanOverrides {
    /// Returns `plan` with every configured field replaced.
    #[must_use]
    pub fn apply(&self, mut plan: TrialPlan) -> TrialPlan {
        if let Some(start_offset) = self.start_offset {
            plan.start_offset = start_offset;
        }
        if let Some(end_offset) = self.end_offset {
            plan.end_offset = end_offset;
        }
        if let Some(interval) = self.interval {
            plan.interval = interval;
        }
        // Only meaningful for the plan shape the preset already has.
        if let (Some(duration), false) = (self.duration, plan.is_repetition_driven()) {
            plan.duration = duration;
        }
        if let (Some(repetitions), true) = (self.repetitions, plan.is_repetition_driven()) {
            plan.repetitions = repetitions.max(1);
        }
        plan
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

//! Robot node configuration.
//!
//! Layered like the host: defaults, an optional TOML file, then `ROBOT_*`
//! environment variables with `__` between nested keys
//! (`ROBOT_CONTROLLER__SPEED=300`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use experiment_core::robot::ControllerConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "ROBOT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("tick_ms must be at least 1")]
    ZeroTick,
    #[error("avoid_min {min:?} exceeds avoid_max {max:?}")]
    AvoidRange { min: Duration, max: Duration },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Bus topic this robot answers to.
    pub id: u16,
    /// Host running the command bus.
    pub host: String,
    pub port: u16,
    /// Control loop period in milliseconds.
    pub tick_ms: u64,
    pub log_level: String,
    pub controller: ControllerConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            id: 0,
            host: "localhost".to_owned(),
            port: 5556,
            tick_ms: 10,
            log_level: "info".to_owned(),
            controller: ControllerConfig::default(),
        }
    }
}

impl RobotConfig {
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(missing) = path.filter(|path| !path.exists()) {
            return Err(ConfigError::Missing(missing.to_path_buf()));
        }
        Self::extract(&Self::figment(path))
    }

    pub fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        if config.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        let ControllerConfig {
            avoid_min,
            avoid_max,
            ..
        } = config.controller;
        if avoid_min > avoid_max {
            return Err(ConfigError::AvoidRange {
                min: avoid_min,
                max: avoid_max,
            });
        }
        Ok(config)
    }

    #[must_use]
    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// `host:port` of the command bus.
    #[must_use]
    pub fn bus_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn defaults_point_at_local_bus() {
        let config = RobotConfig::extract(&RobotConfig::figment(None)).unwrap();
        assert_eq!(config.bus_address(), "localhost:5556");
        assert_eq!(config.tick_period(), Duration::from_millis(10));
        assert_eq!(config.controller, ControllerConfig::default());
    }

    #[test]
    fn toml_file_sets_identity_and_policy() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
id = 7
host = "10.0.0.2"

[controller]
speed = 180
back_duration = 0.5
"#
        )
        .unwrap();

        let config = RobotConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.id, 7);
        assert_eq!(config.bus_address(), "10.0.0.2:5556");
        assert_eq!(config.controller.speed, 180);
        assert_eq!(config.controller.back_duration, Duration::from_millis(500));
        assert_eq!(config.controller.obstacle_threshold, 1000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tick = Figment::from(Serialized::defaults(RobotConfig::default()))
            .merge(Toml::string("tick_ms = 0"));
        assert!(matches!(RobotConfig::extract(&tick), Err(ConfigError::ZeroTick)));

        let avoid = Figment::from(Serialized::defaults(RobotConfig::default()))
            .merge(Toml::string("[controller]\navoid_min = 2.0\navoid_max = 1.0"));
        assert!(matches!(
            RobotConfig::extract(&avoid),
            Err(ConfigError::AvoidRange { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot.toml");
        assert!(matches!(
            RobotConfig::load(Some(&path)),
            Err(ConfigError::Missing(_))
        ));
    }
}

//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings.
//! Configuration is loaded from a TOML file with environment variable
//! overrides for the values that usually differ per shell:
//! `RCLUSTER_PROFILE`, `RCLUSTER_REGION` and `RCLUSTER_IMAGE_ID`.
//!
//! # Example
//!
//! ```no_run
//! use rcluster::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::bootstrap::{BootstrapConfig, ServiceConfig};
use super::logging::LoggingConfig;
use super::provider::{ProviderConfig, SshConfig};
use super::provisioning::{ProvisioningConfig, RetryConfig};
use crate::domain::{AccountContext, BootstrapStep};
use crate::error::{ConfigError, Result};

pub const ENV_PROFILE: &str = "RCLUSTER_PROFILE";
pub const ENV_REGION: &str = "RCLUSTER_REGION";
pub const ENV_IMAGE_ID: &str = "RCLUSTER_IMAGE_ID";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Where instances come from.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// How nodes are reached.
    #[serde(default)]
    pub ssh: SshConfig,

    /// Polling and timeouts.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Backoff for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Bootstrap plans and hostfile placement.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Interactive service on the manager.
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory holding session records. Defaults to `~/.rcluster`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Config {
    /// Parse configuration from TOML content, apply environment overrides
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed,
    /// or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    fn apply_env_overrides(&mut self) {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(profile) = non_empty(ENV_PROFILE) {
            self.provider.profile = profile;
        }
        if let Some(region) = non_empty(ENV_REGION) {
            self.provider.region = region;
        }
        if let Some(image_id) = non_empty(ENV_IMAGE_ID) {
            self.provider.image_id = image_id;
        }
    }

    /// Validate configuration values.
    ///
    /// The image id is checked at launch time instead, since `launch --image`
    /// may supply it.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.provider.region.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "region" }.into());
        }
        if self.provider.profile.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "profile" }.into());
        }
        if self.provider.tag_key.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "tag_key" }.into());
        }

        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let provisioning = &self.provisioning;
        if provisioning.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if provisioning.node_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "node_timeout_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if provisioning.node_timeout_secs > provisioning.session_timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "node_timeout_secs",
                reason: "must be <= session_timeout_secs".to_string(),
            }
            .into());
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "max_delay_ms",
                reason: "must be >= base_delay_ms".to_string(),
            }
            .into());
        }

        if !self.bootstrap.shared_home.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "shared_home",
                reason: "must be an absolute path".to_string(),
            }
            .into());
        }
        if self.bootstrap.hostfile_name.is_empty() || self.bootstrap.hostfile_name.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "hostfile_name",
                reason: "must be a plain file name".to_string(),
            }
            .into());
        }
        check_steps("bootstrap.manager", &self.bootstrap.manager)?;
        check_steps("bootstrap.worker", &self.bootstrap.worker)?;

        if self.service.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Account context sessions are keyed by.
    #[must_use]
    pub fn account(&self) -> AccountContext {
        AccountContext::new(&self.provider.profile, &self.provider.region)
    }

    /// Image to launch: the override if given, else the configured one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither is set.
    pub fn image_id(&self, override_id: Option<&str>) -> Result<String> {
        override_id
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .or_else(|| Some(self.provider.image_id.clone()).filter(|id| !id.trim().is_empty()))
            .ok_or_else(|| ConfigError::MissingField { field: "image_id" }.into())
    }

    /// Directory holding session records.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(crate::adapter::inbound::cli::paths::state_dir)
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

fn check_steps(field: &'static str, steps: &[BootstrapStep]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.name.trim().is_empty() || step.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field,
                reason: "steps need a name and a command".to_string(),
            }
            .into());
        }
        if !seen.insert(step.marker_name()) {
            return Err(ConfigError::InvalidValue {
                field,
                reason: format!("duplicate step name '{}'", step.name),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::port::AddressKind;

    fn invalid_field(toml: &str) -> &'static str {
        match Config::parse_toml(toml) {
            Err(Error::Config(ConfigError::InvalidValue { field, .. }))
            | Err(Error::Config(ConfigError::MissingField { field })) => field,
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.provisioning.poll_interval_secs, 5);
        assert_eq!(config.provisioning.node_timeout_secs, 600);
        assert_eq!(config.provisioning.session_timeout_secs, 1200);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.service.port, 8787);
        assert_eq!(config.ssh.user, "ubuntu");
        assert_eq!(config.provider.address, AddressKind::Public);
        assert_eq!(config.bootstrap.shared_home, "/home/cluster");
    }

    #[test]
    fn parses_sections_and_custom_steps() {
        let config = Config::parse_toml(
            r#"
            [provider]
            region = "eu-west-1"
            profile = "lab"
            image_id = "ami-123"
            address = "private"
            security_groups = ["sg-1"]

            [provisioning]
            poll_interval_secs = 2

            [[bootstrap.worker]]
            name = "hello"
            command = "echo {manager_address}"
            "#,
        )
        .unwrap();

        assert_eq!(config.account().as_str(), "lab@eu-west-1");
        assert_eq!(config.provider.address, AddressKind::Private);
        assert_eq!(config.provisioning.driver_settings().poll_interval.as_secs(), 2);
        assert_eq!(config.bootstrap.worker[0].name, "hello");
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(invalid_field("[provider]\nregion = \"\""), "region");
        assert_eq!(
            invalid_field("[provisioning]\npoll_interval_secs = 0"),
            "poll_interval_secs"
        );
        assert_eq!(
            invalid_field("[provisioning]\nnode_timeout_secs = 3000"),
            "node_timeout_secs"
        );
        assert_eq!(invalid_field("[retry]\nmax_attempts = 0"), "max_attempts");
        assert_eq!(
            invalid_field("[retry]\nbase_delay_ms = 60000"),
            "max_delay_ms"
        );
        assert_eq!(invalid_field("[service]\nport = 0"), "port");
        assert_eq!(
            invalid_field("[bootstrap]\nshared_home = \"relative\""),
            "shared_home"
        );
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let toml = r#"
            [[bootstrap.manager]]
            name = "a"
            command = "true"

            [[bootstrap.manager]]
            name = "a"
            command = "false"
        "#;
        assert_eq!(invalid_field(toml), "bootstrap.manager");
    }

    #[test]
    fn rejects_zero_connect_timeout() {
        assert_eq!(
            invalid_field("[ssh]\nconnect_timeout_secs = 0"),
            "connect_timeout_secs"
        );
    }

    #[test]
    fn rejects_step_names_sharing_a_marker() {
        let toml = r#"
            [[bootstrap.worker]]
            name = "setup r"
            command = "echo one"

            [[bootstrap.worker]]
            name = "setup-r"
            command = "echo two"
        "#;
        assert_eq!(invalid_field(toml), "bootstrap.worker");
    }

    #[test]
    fn image_override_wins() {
        let mut config = Config::default();
        assert!(config.image_id(None).is_err());
        config.provider.image_id = "ami-config".into();
        assert_eq!(config.image_id(None).unwrap(), "ami-config");
        assert_eq!(config.image_id(Some("ami-cli")).unwrap(), "ami-cli");
        assert_eq!(config.image_id(Some(" ")).unwrap(), "ami-config");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Config::parse_toml("[provider"),
            Err(Error::Config(ConfigError::Parse(_)))
        ));
    }
}

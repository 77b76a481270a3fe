//! Configuration validation.
//!
//! Checks that every configured value the engine relies on is present and
//! within range before a job is started.

use std::net::IpAddr;
use thiserror::Error;

use crate::config::{Config, DaemonConfig, LoggingConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

/// Parse `addr/prefix` into its parts, rejecting prefixes wider than the address family.
pub fn parse_cidr(value: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = value.split_once('/')?;
    let addr: IpAddr = addr.trim().parse().ok()?;
    let prefix: u8 = prefix.trim().parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.job_timeout.is_zero() {
            errors.push(ValidationError::InvalidValue {
                field: "job_timeout".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.base_image.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "base_image".into(),
            });
        }

        if self.docker_binary.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "docker_binary".into(),
            });
        }

        if let Err(e) = self.additional_docker_daemon.validate() {
            errors.push(e);
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        collapse(errors)
    }
}

impl Validate for DaemonConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if parse_cidr(&self.network_bridge_mask).is_none() {
            errors.push(ValidationError::InvalidValue {
                field: "additional_docker_daemon.network_bridge_mask".into(),
                reason: format!("'{}' is not an address/prefix pair", self.network_bridge_mask),
            });
        }

        for server in &self.dns {
            if server.parse::<IpAddr>().is_err() {
                errors.push(ValidationError::InvalidValue {
                    field: "additional_docker_daemon.dns".into(),
                    reason: format!("'{server}' is not an IP address"),
                });
            }
        }

        if self.max_wait_time.is_zero() {
            errors.push(ValidationError::InvalidValue {
                field: "additional_docker_daemon.max_wait_time".into(),
                reason: "must be greater than 0".into(),
            });
        }

        collapse(errors)
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "logging.level".into(),
                reason: format!("'{}' is not one of {}", self.level, LEVELS.join(", ")),
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load (from `path` if given), apply environment overrides and validate.
    pub fn load_and_validate(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = Self::load_with_env(path)?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test_case("10.254.0.1/24" => true ; "ipv4 with prefix")]
    #[test_case("fd00::1/64" => true ; "ipv6 with prefix")]
    #[test_case("10.254.0.1" => false ; "missing prefix")]
    #[test_case("10.254.0.1/33" => false ; "prefix too wide")]
    #[test_case("bridge/24" => false ; "not an address")]
    fn cidr_parsing(value: &str) -> bool {
        parse_cidr(value).is_some()
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = Config {
            job_timeout: Duration::ZERO,
            ..Default::default()
        };
        match config.validate() {
            Err(ValidationError::InvalidValue { field, .. }) => assert_eq!(field, "job_timeout"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn every_violation_is_reported() {
        let mut config = Config {
            base_image: String::new(),
            ..Default::default()
        };
        config.additional_docker_daemon.dns = vec!["not-an-ip".into()];
        config.logging.level = "loud".into();

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

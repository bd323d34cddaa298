//! Process-wide configuration, read once at startup from the environment.
//!
//! | Variable                     | Default            |
//! |------------------------------|--------------------|
//! | `CODE_EXEC_IMAGE`            | `py-golang:latest` |
//! | `CODE_EXEC_MEMORY_BYTES`     | `134217728`        |
//! | `CODE_EXEC_NANO_CPUS`        | `1000000000`       |
//! | `CODE_EXEC_TIMEOUT_SECS`     | `30`               |
//! | `CODE_EXEC_MAX_OUTPUT_BYTES` | `65536`            |
//! | `CODE_EXEC_SCRIPTS_DIR`      | `scripts`          |
//! | `CODE_EXEC_LOG_EXIT_STATUS`  | `false`            |
//! | `CODE_EXEC_AUTO_REMOVE`      | `true`             |
//! | `CODE_EXEC_AUTO_PULL`        | `true`             |
//! | `CODE_EXEC_HOST`             | `0.0.0.0`          |
//! | `CODE_EXEC_PORT`             | `8080`             |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sandbox::{ResourceLimits, SandboxConfig};

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub http: HttpConfig,
}

/// HTTP front end configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl HttpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
                key: key.to_string(),
            }),
        })
    }

    /// Load configuration using `lookup` to read variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let env = Env { lookup };
        let sandbox_defaults = SandboxConfig::default();
        let limit_defaults = ResourceLimits::default();
        let http_defaults = HttpConfig::default();

        let limits = ResourceLimits {
            memory_bytes: env.parse("CODE_EXEC_MEMORY_BYTES", limit_defaults.memory_bytes)?,
            nano_cpus: env.parse("CODE_EXEC_NANO_CPUS", limit_defaults.nano_cpus)?,
            timeout: Duration::from_secs(
                env.parse("CODE_EXEC_TIMEOUT_SECS", limit_defaults.timeout.as_secs())?,
            ),
            max_output_bytes: env
                .parse("CODE_EXEC_MAX_OUTPUT_BYTES", limit_defaults.max_output_bytes)?,
        };

        if limits.memory_bytes == 0 {
            return Err(invalid("CODE_EXEC_MEMORY_BYTES", "must be greater than zero"));
        }
        if limits.nano_cpus == 0 {
            return Err(invalid("CODE_EXEC_NANO_CPUS", "must be greater than zero"));
        }
        if limits.timeout.is_zero() {
            return Err(invalid("CODE_EXEC_TIMEOUT_SECS", "must be greater than zero"));
        }

        let sandbox = SandboxConfig {
            image: env
                .get("CODE_EXEC_IMAGE")?
                .filter(|s| !s.is_empty())
                .unwrap_or(sandbox_defaults.image),
            limits,
            scripts_dir: env
                .get("CODE_EXEC_SCRIPTS_DIR")?
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(sandbox_defaults.scripts_dir),
            log_exit_status: env.flag("CODE_EXEC_LOG_EXIT_STATUS", sandbox_defaults.log_exit_status)?,
            auto_remove: env.flag("CODE_EXEC_AUTO_REMOVE", sandbox_defaults.auto_remove)?,
            auto_pull_image: env.flag("CODE_EXEC_AUTO_PULL", sandbox_defaults.auto_pull_image)?,
        };

        let http = HttpConfig {
            host: env.parse("CODE_EXEC_HOST", http_defaults.host)?,
            port: env.parse("CODE_EXEC_PORT", http_defaults.port)?,
        };

        Ok(Self { sandbox, http })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        (self.lookup)(key)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key)? {
            Some(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &e.to_string())),
            _ => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key)? {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "" => Ok(default),
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(invalid(key, &format!("expected a boolean, got '{}'", other))),
            },
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

//! Configuration of the driver, loadable from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```
//! use rigol_dp2000::Dp2000Config;
//!
//! let config = Dp2000Config::from_toml_str(
//!     r#"
//!     [session]
//!     timeout_ms = 2000
//!
//!     [retry]
//!     max_retries = 4
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.retry.max_retries, 4);
//! assert_eq!(config.limits.num_channels, 3);
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;

use instrumentrs::{Encoding, InstrumentError, RetryPolicy, SessionOptions};

/// Configuration of a [`crate::Dp2000`] driver.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Dp2000Config {
    /// Options applied to the session on connect.
    pub session: SessionConfig,
    /// Retry and reconnect timing.
    pub retry: RetryConfig,
    /// Channel count and output limits.
    pub limits: LimitsConfig,
    /// Driver behavior.
    pub driver: DriverConfig,
}

/// The `[session]` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Terminator that ends a response.
    pub read_terminator: String,
    /// Terminator appended to every command.
    pub write_terminator: String,
    /// `"ascii"` or `"utf-8"`.
    pub encoding: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout_ms: 5000,
            read_terminator: "\n".to_string(),
            write_terminator: "\n".to_string(),
            encoding: "utf-8".to_string(),
        }
    }
}

/// The `[retry]` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Additional attempts after a failed exchange.
    pub max_retries: usize,
    /// Pause between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Pause between disconnecting and reconnecting in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 2,
            retry_delay_ms: 100,
            reconnect_delay_ms: 1000,
        }
    }
}

/// The `[limits]` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Number of channels, they are numbered from 1.
    pub num_channels: usize,
    /// Maximum voltage setpoint in volts.
    pub max_voltage: f64,
    /// Maximum current setpoint in amperes.
    pub max_current: f64,
    /// Maximum output power in watts.
    pub max_power: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            num_channels: 3,
            max_voltage: 64.0,
            max_current: 10.0,
            max_power: 222.0,
        }
    }
}

/// The `[driver]` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Minimum time between two drains of the error queue in milliseconds.
    pub error_check_interval_ms: u64,
    /// Close the connection, which switches all outputs off, when the last driver handle is
    /// dropped.
    pub close_on_drop: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            error_check_interval_ms: 1000,
            close_on_drop: true,
        }
    }
}

impl Dp2000Config {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, InstrumentError> {
        let config: Dp2000Config = toml::from_str(s)
            .map_err(|err| InstrumentError::InvalidArgument(format!("Invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InstrumentError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the values that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<(), InstrumentError> {
        if self.session.timeout_ms == 0 {
            return Err(InstrumentError::InvalidArgument(
                "timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.limits.num_channels == 0 {
            return Err(InstrumentError::InvalidArgument(
                "At least one channel is required".to_string(),
            ));
        }
        for (name, value) in [
            ("max_voltage", self.limits.max_voltage),
            ("max_current", self.limits.max_current),
            ("max_power", self.limits.max_power),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(InstrumentError::InvalidArgument(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.session.write_terminator.is_empty() || self.session.read_terminator.is_empty() {
            return Err(InstrumentError::InvalidArgument(
                "Terminators must not be empty".to_string(),
            ));
        }
        self.session.encoding.parse::<Encoding>()?;
        Ok(())
    }

    /// The session options for connecting.
    pub fn session_options(&self) -> Result<SessionOptions, InstrumentError> {
        Ok(SessionOptions {
            timeout: Duration::from_millis(self.session.timeout_ms),
            read_terminator: self.session.read_terminator.clone(),
            write_terminator: self.session.write_terminator.clone(),
            encoding: self.session.encoding.parse()?,
        })
    }

    /// The retry policy of the session.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            retry_delay: Duration::from_millis(self.retry.retry_delay_ms),
            reconnect_delay: Duration::from_millis(self.retry.reconnect_delay_ms),
        }
    }

    /// Minimum time between two drains of the error queue.
    pub fn error_check_interval(&self) -> Duration {
        Duration::from_millis(self.driver.error_check_interval_ms)
    }
}

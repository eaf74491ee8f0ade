//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{HmLinkError, Result};
use crate::hm::protocol::{InverterIdentity, DTU_SERIAL};
use crate::link::session::{tx_channel_for_index, LinkConfig};
use crate::radio::PowerLevel;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inverter: InverterConfig,

    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub command: CommandConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inverter to talk to
#[derive(Debug, Deserialize, Clone)]
pub struct InverterConfig {
    /// 12-digit serial number printed on the inverter
    pub serial: u64,
}

/// Transceiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    /// 0 (min) ..= 3 (max)
    #[serde(default)]
    pub power_level: u8,

    /// Index into the transmit channel table
    #[serde(default)]
    pub tx_channel: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_rx_window_ms")]
    pub rx_window_ms: u64,

    #[serde(default = "default_spi_device")]
    pub spi_device: String,

    #[serde(default = "default_spi_speed_hz")]
    pub spi_speed_hz: u32,

    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: String,

    /// GPIO line driving the chip's CE pin
    #[serde(default = "default_ce_line")]
    pub ce_line: u32,
}

/// Command configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandConfig {
    /// Telemetry fetches tried when reading the event counter around a command
    #[serde(default = "default_baseline_attempts")]
    pub baseline_attempts: u32,
}

/// Output format of polled samples
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Polling loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,

    #[serde(default)]
    pub format: OutputFormat,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily-rolling log files here
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            power_level: 0,
            tx_channel: 0,
            timeout_ms: default_timeout_ms(),
            rx_window_ms: default_rx_window_ms(),
            spi_device: default_spi_device(),
            spi_speed_hz: default_spi_speed_hz(),
            gpio_chip: default_gpio_chip(),
            ce_line: default_ce_line(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            baseline_attempts: default_baseline_attempts(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_s: default_interval_s(),
            format: OutputFormat::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

// Default value functions
fn default_timeout_ms() -> u64 { 2000 }
fn default_rx_window_ms() -> u64 { 7 }
fn default_spi_device() -> String { "/dev/spidev0.0".to_string() }
fn default_spi_speed_hz() -> u32 { 4_000_000 }
fn default_gpio_chip() -> String { "/dev/gpiochip0".to_string() }
fn default_ce_line() -> u32 { 25 }

fn default_baseline_attempts() -> u32 { 10 }

fn default_interval_s() -> u64 { 10 }

fn default_log_level() -> String { "info".to_string() }

fn invalid(message: impl std::fmt::Display) -> HmLinkError {
    HmLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hm_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedInverterFamily`, `InvalidPowerLevel` or
    /// `InvalidTxChannel` for the matching fields, and `Config` for any other
    /// value out of its valid range.
    fn validate(&self) -> Result<()> {
        InverterIdentity::new(self.inverter.serial)?;
        PowerLevel::from_index(self.radio.power_level)?;
        tx_channel_for_index(self.radio.tx_channel)?;

        if self.radio.timeout_ms == 0 || self.radio.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }

        if self.radio.rx_window_ms == 0 || self.radio.rx_window_ms > 100 {
            return Err(invalid("rx_window_ms must be between 1 and 100"));
        }

        if self.radio.spi_device.is_empty() {
            return Err(invalid("spi_device cannot be empty"));
        }

        if self.radio.gpio_chip.is_empty() {
            return Err(invalid("gpio_chip cannot be empty"));
        }

        if self.radio.spi_speed_hz == 0 || self.radio.spi_speed_hz > 10_000_000 {
            return Err(invalid("spi_speed_hz must be between 1 and 10000000"));
        }

        if self.command.baseline_attempts == 0 || self.command.baseline_attempts > 100 {
            return Err(invalid("baseline_attempts must be between 1 and 100"));
        }

        if self.polling.interval_s == 0 || self.polling.interval_s > 3600 {
            return Err(invalid("interval_s must be between 1 and 3600"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }

    /// Identity of the configured inverter
    pub fn identity(&self) -> Result<InverterIdentity> {
        InverterIdentity::new(self.inverter.serial)
    }

    /// Session parameters for the configured radio
    pub fn link_config(&self) -> Result<LinkConfig> {
        Ok(LinkConfig {
            dtu_serial: DTU_SERIAL,
            power_level: PowerLevel::from_index(self.radio.power_level)?,
            tx_channel: tx_channel_for_index(self.radio.tx_channel)?,
            timeout_ms: self.radio.timeout_ms,
            rx_window_ms: self.radio.rx_window_ms,
            baseline_attempts: self.command.baseline_attempts,
        })
    }
}

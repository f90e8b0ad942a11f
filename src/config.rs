//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HottError, Result};
use crate::hott::decoder::DecodeContext;
use crate::hott::protocol::{
    ProtocolVariant, SensorType, CMD_GAP_MS, DBM_TIMEOUT_MS, ECHO_GAP_MS, QUERY_GAP_MS,
    READ_TIMEOUT_MS, TRANSFER_ERROR_BUDGET, TRANSFER_TIMEOUT_MS,
};

/// Upper bound for every configurable timeout
const MAX_TIMEOUT_MS: u64 = 60_000;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// 0 selects the rate of the protocol variant
    #[serde(default)]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_dbm_timeout_ms")]
    pub dbm_timeout_ms: u64,

    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
}

/// Query cycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_variant")]
    pub variant: ProtocolVariant,

    /// Listen to a bus driven by another master instead of querying
    #[serde(default)]
    pub slave_mode: bool,

    /// Query receiver signal strength after each receiver cycle (fast only)
    #[serde(default)]
    pub query_dbm: bool,

    #[serde(default = "default_query_gap_ms")]
    pub query_gap_ms: u64,

    #[serde(default = "default_command_gap_ms")]
    pub command_gap_ms: u64,

    #[serde(default = "default_echo_gap_ms")]
    pub echo_gap_ms: u64,

    #[serde(default = "default_error_budget")]
    pub error_budget: u32,

    /// Sensor polled between receiver cycles
    #[serde(default = "default_sensor")]
    pub sensor: SensorType,
}

/// Decoder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default = "default_true")]
    pub filter_enabled: bool,

    /// Skip capture blocks flagged as text mode
    #[serde(default = "default_true")]
    pub filter_text_mode: bool,

    #[serde(default = "default_true")]
    pub channel_percent_enabled: bool,

    #[serde(default)]
    pub channels_enabled: bool,

    /// 0 auto, 1 Vario, 2 GPS, 3 General, 4 Electric
    #[serde(default)]
    pub altitude_climb_sensor_selection: u8,

    #[serde(default = "default_latitude_tolerance")]
    pub latitude_tolerance_factor: f64,

    #[serde(default = "default_longitude_tolerance")]
    pub longitude_tolerance_factor: f64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily rolling log file, in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_read_timeout_ms() -> u64 { READ_TIMEOUT_MS }
fn default_dbm_timeout_ms() -> u64 { DBM_TIMEOUT_MS }
fn default_transfer_timeout_ms() -> u64 { TRANSFER_TIMEOUT_MS }

fn default_variant() -> ProtocolVariant { ProtocolVariant::Fast115200 }
fn default_query_gap_ms() -> u64 { QUERY_GAP_MS }
fn default_command_gap_ms() -> u64 { CMD_GAP_MS }
fn default_echo_gap_ms() -> u64 { ECHO_GAP_MS }
fn default_error_budget() -> u32 { TRANSFER_ERROR_BUDGET }
fn default_sensor() -> SensorType { SensorType::Vario }

fn default_true() -> bool { true }
fn default_latitude_tolerance() -> f64 { 50.0 }
fn default_longitude_tolerance() -> f64 { 15.0 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: 0,
            read_timeout_ms: default_read_timeout_ms(),
            dbm_timeout_ms: default_dbm_timeout_ms(),
            transfer_timeout_ms: default_transfer_timeout_ms(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            slave_mode: false,
            query_dbm: false,
            query_gap_ms: default_query_gap_ms(),
            command_gap_ms: default_command_gap_ms(),
            echo_gap_ms: default_echo_gap_ms(),
            error_budget: default_error_budget(),
            sensor: default_sensor(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            filter_text_mode: true,
            channel_percent_enabled: true,
            channels_enabled: false,
            altitude_climb_sensor_selection: 0,
            latitude_tolerance_factor: default_latitude_tolerance(),
            longitude_tolerance_factor: default_longitude_tolerance(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl SerialConfig {
    /// Configured baud rate, or the variant's rate when unset
    pub fn effective_baud_rate(&self, variant: ProtocolVariant) -> u32 {
        if self.baud_rate == 0 {
            variant.baud_rate()
        } else {
            self.baud_rate
        }
    }
}

impl DecoderConfig {
    /// Decoder inputs for a stream with these settings
    ///
    /// Previous values, loss and sample counts are filled in per frame.
    pub fn context(&self) -> DecodeContext<'static> {
        DecodeContext {
            filter_enabled: self.filter_enabled,
            latitude_tolerance: self.latitude_tolerance_factor,
            longitude_tolerance: self.longitude_tolerance_factor,
            channels_enabled: self.channels_enabled,
            ..DecodeContext::default()
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> HottError {
    HottError::Config(toml::de::Error::custom(message))
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
    /// use hott_link::config::Config;
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
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.baud_rate != 0 && !matches!(self.serial.baud_rate, 19_200 | 115_200) {
            return Err(invalid(format!(
                "baud_rate {} not supported, use 19200 or 115200",
                self.serial.baud_rate
            )));
        }

        for (name, value) in [
            ("read_timeout_ms", self.serial.read_timeout_ms),
            ("dbm_timeout_ms", self.serial.dbm_timeout_ms),
            ("transfer_timeout_ms", self.serial.transfer_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(invalid(format!(
                    "{} must be between 1 and {}",
                    name, MAX_TIMEOUT_MS
                )));
            }
        }

        if self.link.error_budget == 0 {
            return Err(invalid("error_budget must be greater than 0"));
        }

        if self.link.sensor.wire_byte(self.link.variant).is_none() {
            return Err(invalid(format!(
                "sensor {} cannot be queried with protocol {}",
                self.link.sensor, self.link.variant
            )));
        }

        if self.decoder.altitude_climb_sensor_selection > 4 {
            return Err(invalid("altitude_climb_sensor_selection must be between 0 and 4"));
        }

        if self.decoder.latitude_tolerance_factor <= 0.0 {
            return Err(invalid("latitude_tolerance_factor must be positive"));
        }

        if self.decoder.longitude_tolerance_factor <= 0.0 {
            return Err(invalid("longitude_tolerance_factor must be positive"));
        }

        Ok(())
    }
}

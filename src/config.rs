//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration for the uplink runtime.
//! Configuration is loaded from:
//! 1. Built-in defaults
//! 2. A TOML file (base configuration)
//! 3. Environment variables (prefixed with `UPLINK_`, `__` between levels)
//!
//! Every numeric bound is validated against its documented range. Values
//! outside the range are rejected, never clamped, both at load time
//! ([`Settings::validate`]) and at run time through the setters, which is how
//! downlink settings updates reach the configuration.
//!
//! # Example
//! ```no_run
//! use telemetry_uplink::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut settings = Settings::load_from("config/uplink.toml")?;
//! settings.set_max_resend_attempts(5)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, SettingsError, UplinkError};
use crate::validation::{in_range, not_empty, valid_name, valid_port};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Settings shared between the runtime, the Packer and the Mailer.
pub type SharedSettings = Arc<RwLock<Settings>>;

// =============================================================================
// Documented Ranges
// =============================================================================

/// Uplink timeout in minutes (5 min to 24 h).
pub const UPLINK_TIMEOUT_MIN: RangeInclusive<u16> = 5..=1440;
/// Uplink timeout without power-saving mode, in hours.
pub const NO_PSM_UPLINK_TIMEOUT_H: RangeInclusive<u16> = 1..=24;
/// Network attach timeout in seconds (up to 30 min).
pub const LTE_CONNECTION_TIMEOUT_S: RangeInclusive<u16> = 1..=1800;
/// Initial resend timeout in minutes.
pub const RESEND_INITIAL_TIMEOUT_MIN: RangeInclusive<u8> = 1..=60;
/// Maximum resend timeout in hours.
pub const MAX_RESEND_TIMEOUT_H: RangeInclusive<u8> = 1..=24;
/// Send attempts per message before the connection is torn down.
pub const MAX_RESEND_ATTEMPTS: RangeInclusive<u8> = 1..=10;
/// Response wait per exchange, in seconds.
pub const RESPONSE_WAIT_TIMEOUT_S: RangeInclusive<u8> = 1..=60;
/// Retries per block of a file upload or firmware download.
pub const FILE_UL_RETRIES: RangeInclusive<u8> = 1..=10;
/// Packed messages between two radio-quality reports.
pub const PACKET_COUNTER_LIMIT: RangeInclusive<u32> = 1..=10_000;
/// Outbox depth.
pub const QUEUE_DEPTH: RangeInclusive<u8> = 1..=16;
/// Log file size in bytes (1 KB to 1 MB).
pub const LOG_FILE_MAX_SIZE: RangeInclusive<i32> = 1024..=1_048_576;
/// Log rotation check frequency, in Mailer wake-ups.
pub const LOG_ROTATION_FREQUENCY: RangeInclusive<u8> = 1..=50;
/// Rotated log files kept on storage.
pub const NUM_LOG_FILES: RangeInclusive<u8> = 1..=20;

// =============================================================================
// Enums
// =============================================================================

/// Whether the Mailer also wakes on the uplink timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailerWaitMode {
    /// Wake on trigger or when the uplink timeout elapses.
    #[default]
    WaitOnTimeout,
    /// Wake only when explicitly triggered.
    WaitForever,
}

/// Verbosity of saved logs and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Errors,
    /// Errors and warnings.
    Warnings,
    /// Everything.
    #[default]
    Informative,
}

impl LogLevel {
    /// Maps the wire value used by downlink settings updates.
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Errors),
            1 => Some(Self::Warnings),
            2 => Some(Self::Informative),
            _ => None,
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Collector endpoint and resources
    pub coap: CoapSettings,
    /// Uplink timing and retry policy
    pub uplink: UplinkSettings,
    /// Log storage
    pub storage: StorageSettings,
    /// Diagnostic tracing output
    pub tracing: TracingSettings,
}

/// Collector endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoapSettings {
    /// Collector hostname
    pub server_hostname: String,
    /// Collector port (5683 plain, 5684 secured)
    pub server_port: u16,
    /// Resource receiving uplink messages
    pub tx_resource: String,
    /// Resource receiving block-wise file uploads
    pub tx_file_resource: String,
    /// Resource serving firmware images
    pub tx_fw_resource: String,
    /// Device name presented to the collector
    pub device_name: String,
    /// Pre-shared key; empty disables the secured transport
    pub server_psk: String,
}

impl Default for CoapSettings {
    fn default() -> Self {
        Self {
            server_hostname: "collector.local".to_string(),
            server_port: 5684,
            tx_resource: "data".to_string(),
            tx_file_resource: "file".to_string(),
            tx_fw_resource: "fw".to_string(),
            device_name: "edge-device".to_string(),
            server_psk: String::new(),
        }
    }
}

/// Uplink timing, retry and queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkSettings {
    /// Minutes between unsolicited uplinks in [`MailerWaitMode::WaitOnTimeout`]
    pub uplink_timeout_min: u16,
    /// Hours between uplinks when the network offers no power-saving mode
    pub no_psm_uplink_timeout_h: u16,
    /// Seconds allowed for network attach
    pub lte_connection_timeout_s: u16,
    /// First resend delay in minutes
    pub resend_initial_timeout_min: u8,
    /// Resend delay cap in hours
    pub max_resend_timeout_h: u8,
    /// Attempts per message before giving up on the cycle
    pub max_resend_attempts: u8,
    /// Seconds to wait for a response per exchange
    pub response_wait_timeout_s: u8,
    /// Retries per block of a file transfer
    pub file_ul_retries: u8,
    /// Packed messages between radio-quality reports
    pub packet_counter_limit: u32,
    /// Outbox depth before the oldest message is dropped
    pub queue_depth: u8,
    /// Mailer wake-up policy
    pub mailer_wait_mode: MailerWaitMode,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            uplink_timeout_min: 60,
            no_psm_uplink_timeout_h: 24,
            lte_connection_timeout_s: 300,
            resend_initial_timeout_min: 1,
            max_resend_timeout_h: 1,
            max_resend_attempts: 3,
            response_wait_timeout_s: 10,
            file_ul_retries: 3,
            packet_counter_limit: 24,
            queue_depth: 4,
            mailer_wait_mode: MailerWaitMode::WaitOnTimeout,
        }
    }
}

impl UplinkSettings {
    /// Uplink timeout as a duration.
    pub fn uplink_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.uplink_timeout_min) * 60)
    }

    /// Uplink timeout without power-saving mode.
    pub fn no_psm_uplink_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.no_psm_uplink_timeout_h) * 3600)
    }

    /// Network attach timeout.
    pub fn lte_connection_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.lte_connection_timeout_s))
    }

    /// First resend delay.
    pub fn resend_initial_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.resend_initial_timeout_min) * 60)
    }

    /// Resend delay cap.
    pub fn max_resend_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_resend_timeout_h) * 3600)
    }

    /// Response wait per exchange.
    pub fn response_wait_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.response_wait_timeout_s))
    }
}

/// Log storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding `app.log` and its rotations
    pub log_dir: PathBuf,
    /// Size in bytes at which `app.log` is rotated
    pub log_file_max_size: i32,
    /// Mailer wake-ups between rotation checks
    pub log_rotation_frequency: u8,
    /// Rotated files kept before the oldest is deleted
    pub num_log_files: u8,
    /// Verbosity of saved logs and log events
    pub log_level: LogLevel,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file_max_size: 65_536,
            log_rotation_frequency: 10,
            num_log_files: 5,
            log_level: LogLevel::Informative,
        }
    }
}

/// Diagnostic tracing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Partial settings update carried by a downlink message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    /// New uplink timeout in minutes
    pub uplink_timeout_min: Option<u16>,
    /// New initial resend delay in minutes
    pub resend_initial_timeout_min: Option<u8>,
    /// New resend delay cap in hours
    pub max_resend_timeout_h: Option<u8>,
    /// New attempt limit
    pub max_resend_attempts: Option<u8>,
    /// New response wait in seconds
    pub response_wait_timeout_s: Option<u8>,
    /// New packet counter limit
    pub packet_counter_limit: Option<u32>,
    /// New log level
    pub log_level: Option<LogLevel>,
    /// New Mailer wait mode
    pub mailer_wait_mode: Option<MailerWaitMode>,
}

impl SettingsPatch {
    /// Returns true when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// Loading and Validation
// =============================================================================

impl Settings {
    /// Load configuration from a TOML file and `UPLINK_` environment variables.
    ///
    /// Environment variables override the file, with `__` between levels.
    /// Example: `UPLINK_UPLINK__MAX_RESEND_ATTEMPTS=5`
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("UPLINK_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(source: &str) -> AppResult<Self> {
        let settings: Settings = toml::from_str(source).map_err(|e| {
            UplinkError::Settings(SettingsError::Invalid {
                field: "toml",
                reason: e.to_string(),
            })
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Wrap into the shared handle used by the runtime.
    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Validate every field against its documented range.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let c = &self.coap;
        not_empty("server_hostname", &c.server_hostname)?;
        valid_port("server_port", c.server_port)?;
        valid_name("tx_resource", &c.tx_resource)?;
        valid_name("tx_file_resource", &c.tx_file_resource)?;
        valid_name("tx_fw_resource", &c.tx_fw_resource)?;
        valid_name("device_name", &c.device_name)?;

        let u = &self.uplink;
        in_range("uplink_timeout_min", u.uplink_timeout_min, UPLINK_TIMEOUT_MIN)?;
        in_range(
            "no_psm_uplink_timeout_h",
            u.no_psm_uplink_timeout_h,
            NO_PSM_UPLINK_TIMEOUT_H,
        )?;
        in_range(
            "lte_connection_timeout_s",
            u.lte_connection_timeout_s,
            LTE_CONNECTION_TIMEOUT_S,
        )?;
        in_range(
            "resend_initial_timeout_min",
            u.resend_initial_timeout_min,
            RESEND_INITIAL_TIMEOUT_MIN,
        )?;
        in_range("max_resend_timeout_h", u.max_resend_timeout_h, MAX_RESEND_TIMEOUT_H)?;
        in_range("max_resend_attempts", u.max_resend_attempts, MAX_RESEND_ATTEMPTS)?;
        in_range(
            "response_wait_timeout_s",
            u.response_wait_timeout_s,
            RESPONSE_WAIT_TIMEOUT_S,
        )?;
        in_range("file_ul_retries", u.file_ul_retries, FILE_UL_RETRIES)?;
        in_range("packet_counter_limit", u.packet_counter_limit, PACKET_COUNTER_LIMIT)?;
        in_range("queue_depth", u.queue_depth, QUEUE_DEPTH)?;

        let s = &self.storage;
        in_range("log_file_max_size", s.log_file_max_size, LOG_FILE_MAX_SIZE)?;
        in_range(
            "log_rotation_frequency",
            s.log_rotation_frequency,
            LOG_ROTATION_FREQUENCY,
        )?;
        in_range("num_log_files", s.num_log_files, NUM_LOG_FILES)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.tracing.level.to_lowercase().as_str()) {
            return Err(SettingsError::Invalid {
                field: "tracing.level",
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }
        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.tracing.format.to_lowercase().as_str()) {
            return Err(SettingsError::Invalid {
                field: "tracing.format",
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Validated Setters
// =============================================================================

impl Settings {
    /// Set the uplink timeout in minutes (5..=1440).
    pub fn set_uplink_timeout(&mut self, minutes: u16) -> Result<(), SettingsError> {
        in_range("uplink_timeout_min", minutes, UPLINK_TIMEOUT_MIN)?;
        self.uplink.uplink_timeout_min = minutes;
        Ok(())
    }

    /// Set the uplink timeout used without power-saving mode, in hours (1..=24).
    pub fn set_no_psm_uplink_timeout(&mut self, hours: u16) -> Result<(), SettingsError> {
        in_range("no_psm_uplink_timeout_h", hours, NO_PSM_UPLINK_TIMEOUT_H)?;
        self.uplink.no_psm_uplink_timeout_h = hours;
        Ok(())
    }

    /// Set the network attach timeout in seconds (1..=1800).
    pub fn set_lte_connection_timeout(&mut self, seconds: u16) -> Result<(), SettingsError> {
        in_range("lte_connection_timeout_s", seconds, LTE_CONNECTION_TIMEOUT_S)?;
        self.uplink.lte_connection_timeout_s = seconds;
        Ok(())
    }

    /// Set the initial resend delay in minutes (1..=60).
    pub fn set_resend_initial_timeout(&mut self, minutes: u8) -> Result<(), SettingsError> {
        in_range("resend_initial_timeout_min", minutes, RESEND_INITIAL_TIMEOUT_MIN)?;
        self.uplink.resend_initial_timeout_min = minutes;
        Ok(())
    }

    /// Set the resend delay cap in hours (1..=24).
    pub fn set_max_resend_timeout(&mut self, hours: u8) -> Result<(), SettingsError> {
        in_range("max_resend_timeout_h", hours, MAX_RESEND_TIMEOUT_H)?;
        self.uplink.max_resend_timeout_h = hours;
        Ok(())
    }

    /// Set the attempts per message (1..=10).
    pub fn set_max_resend_attempts(&mut self, attempts: u8) -> Result<(), SettingsError> {
        in_range("max_resend_attempts", attempts, MAX_RESEND_ATTEMPTS)?;
        self.uplink.max_resend_attempts = attempts;
        Ok(())
    }

    /// Set the response wait in seconds (1..=60).
    pub fn set_response_wait_timeout(&mut self, seconds: u8) -> Result<(), SettingsError> {
        in_range("response_wait_timeout_s", seconds, RESPONSE_WAIT_TIMEOUT_S)?;
        self.uplink.response_wait_timeout_s = seconds;
        Ok(())
    }

    /// Set the retries per file transfer block (1..=10).
    pub fn set_file_ul_retries(&mut self, retries: u8) -> Result<(), SettingsError> {
        in_range("file_ul_retries", retries, FILE_UL_RETRIES)?;
        self.uplink.file_ul_retries = retries;
        Ok(())
    }

    /// Set the packed messages between radio-quality reports (1..=10000).
    pub fn set_packet_counter_limit(&mut self, limit: u32) -> Result<(), SettingsError> {
        in_range("packet_counter_limit", limit, PACKET_COUNTER_LIMIT)?;
        self.uplink.packet_counter_limit = limit;
        Ok(())
    }

    /// Set the outbox depth (1..=16).
    pub fn set_queue_depth(&mut self, depth: u8) -> Result<(), SettingsError> {
        in_range("queue_depth", depth, QUEUE_DEPTH)?;
        self.uplink.queue_depth = depth;
        Ok(())
    }

    /// Set the Mailer wake-up policy.
    pub fn set_mailer_wait_mode(&mut self, mode: MailerWaitMode) {
        self.uplink.mailer_wait_mode = mode;
    }

    /// Set the log file rotation size in bytes (1024..=1048576).
    pub fn set_log_file_max_size(&mut self, size: i32) -> Result<(), SettingsError> {
        in_range("log_file_max_size", size, LOG_FILE_MAX_SIZE)?;
        self.storage.log_file_max_size = size;
        Ok(())
    }

    /// Set the rotation check frequency in Mailer wake-ups (1..=50).
    pub fn set_log_rotation_frequency(&mut self, frequency: u8) -> Result<(), SettingsError> {
        in_range("log_rotation_frequency", frequency, LOG_ROTATION_FREQUENCY)?;
        self.storage.log_rotation_frequency = frequency;
        Ok(())
    }

    /// Set the number of rotated log files kept (1..=20).
    pub fn set_num_log_files(&mut self, count: u8) -> Result<(), SettingsError> {
        in_range("num_log_files", count, NUM_LOG_FILES)?;
        self.storage.num_log_files = count;
        Ok(())
    }

    /// Set the saved-log verbosity.
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.storage.log_level = level;
    }

    /// Set the collector port.
    pub fn set_coap_server_port(&mut self, port: u16) -> Result<(), SettingsError> {
        valid_port("server_port", port)?;
        self.coap.server_port = port;
        Ok(())
    }

    /// Set the collector hostname.
    pub fn set_coap_server_hostname(&mut self, hostname: &str) -> Result<(), SettingsError> {
        not_empty("server_hostname", hostname)?;
        self.coap.server_hostname = hostname.to_string();
        Ok(())
    }

    /// Set the uplink resource path.
    pub fn set_coap_tx_resource(&mut self, resource: &str) -> Result<(), SettingsError> {
        valid_name("tx_resource", resource)?;
        self.coap.tx_resource = resource.to_string();
        Ok(())
    }

    /// Set the file upload resource path.
    pub fn set_coap_tx_file_resource(&mut self, resource: &str) -> Result<(), SettingsError> {
        valid_name("tx_file_resource", resource)?;
        self.coap.tx_file_resource = resource.to_string();
        Ok(())
    }

    /// Set the firmware resource path.
    pub fn set_coap_tx_fw_resource(&mut self, resource: &str) -> Result<(), SettingsError> {
        valid_name("tx_fw_resource", resource)?;
        self.coap.tx_fw_resource = resource.to_string();
        Ok(())
    }

    /// Set the device name.
    pub fn set_coap_device_name(&mut self, name: &str) -> Result<(), SettingsError> {
        valid_name("device_name", name)?;
        self.coap.device_name = name.to_string();
        Ok(())
    }

    /// Set the pre-shared key.
    pub fn set_coap_server_psk(&mut self, psk: &str) {
        self.coap.server_psk = psk.to_string();
    }

    /// Apply a downlink settings update all-or-nothing.
    pub fn apply_patch(&mut self, patch: &SettingsPatch) -> Result<(), SettingsError> {
        let mut next = self.clone();
        if let Some(v) = patch.uplink_timeout_min {
            next.set_uplink_timeout(v)?;
        }
        if let Some(v) = patch.resend_initial_timeout_min {
            next.set_resend_initial_timeout(v)?;
        }
        if let Some(v) = patch.max_resend_timeout_h {
            next.set_max_resend_timeout(v)?;
        }
        if let Some(v) = patch.max_resend_attempts {
            next.set_max_resend_attempts(v)?;
        }
        if let Some(v) = patch.response_wait_timeout_s {
            next.set_response_wait_timeout(v)?;
        }
        if let Some(v) = patch.packet_counter_limit {
            next.set_packet_counter_limit(v)?;
        }
        if let Some(v) = patch.log_level {
            next.set_log_level(v);
        }
        if let Some(v) = patch.mailer_wait_mode {
            next.set_mailer_wait_mode(v);
        }
        *self = next;
        Ok(())
    }

    /// Apply a CoAP key/value block stored as `key\0value\0` pairs.
    ///
    /// The whole block is rejected if any pair is malformed, names an unknown
    /// key or carries an invalid value. Returns the number of pairs applied.
    pub fn apply_coap_pairs(&mut self, data: &[u8]) -> Result<usize, SettingsError> {
        let mut fields: Vec<&[u8]> = data.split(|b| *b == 0).collect();
        // A well-formed block ends with a terminator, leaving one empty tail.
        if fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        if fields.is_empty() || fields.len() % 2 != 0 {
            return Err(SettingsError::Invalid {
                field: "coap_keys",
                reason: "expected key\\0value\\0 pairs".to_string(),
            });
        }

        let mut next = self.clone();
        for pair in fields.chunks(2) {
            let key = std::str::from_utf8(pair[0]).map_err(|_| SettingsError::Invalid {
                field: "coap_keys",
                reason: "key is not UTF-8".to_string(),
            })?;
            let value = std::str::from_utf8(pair[1]).map_err(|_| SettingsError::Invalid {
                field: "coap_keys",
                reason: format!("value of {key} is not UTF-8"),
            })?;
            match key {
                "SERVER_HOSTNAME" => next.set_coap_server_hostname(value)?,
                "SERVER_PORT" => {
                    let port = value.parse::<u16>().map_err(|_| SettingsError::Invalid {
                        field: "server_port",
                        reason: format!("'{value}' is not a port number"),
                    })?;
                    next.set_coap_server_port(port)?;
                }
                "COAP_TX_RESOURCE" => next.set_coap_tx_resource(value)?,
                "COAP_TX_FILE_RESOURCE" => next.set_coap_tx_file_resource(value)?,
                "COAP_TX_FW_RESOURCE" => next.set_coap_tx_fw_resource(value)?,
                "DEVICE_NAME" => next.set_coap_device_name(value)?,
                "SERVER_PSK" => next.set_coap_server_psk(value),
                other => return Err(SettingsError::UnknownKey(other.to_string())),
            }
        }
        *self = next;
        Ok(fields.len() / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [uplink]
            max_resend_attempts = 5
            mailer_wait_mode = "wait_forever"

            [storage]
            log_level = "warnings"
            "#,
        )
        .unwrap();

        assert_eq!(settings.uplink.max_resend_attempts, 5);
        assert_eq!(settings.uplink.mailer_wait_mode, MailerWaitMode::WaitForever);
        assert_eq!(settings.storage.log_level, LogLevel::Warnings);
        assert_eq!(settings.uplink.uplink_timeout_min, 60);
    }

    #[test]
    fn out_of_range_toml_is_rejected() {
        let result = Settings::from_toml_str(
            r#"
            [uplink]
            uplink_timeout_min = 2
            "#,
        );
        assert!(matches!(
            result,
            Err(UplinkError::Settings(SettingsError::OutOfRange {
                field: "uplink_timeout_min",
                ..
            }))
        ));
    }

    #[test]
    fn setters_reject_instead_of_clamping() {
        let mut settings = Settings::default();
        assert!(settings.set_max_resend_attempts(0).is_err());
        assert!(settings.set_max_resend_attempts(11).is_err());
        assert_eq!(settings.uplink.max_resend_attempts, 3);

        settings.set_max_resend_attempts(10).unwrap();
        assert_eq!(settings.uplink.max_resend_attempts, 10);

        assert!(settings.set_log_file_max_size(1023).is_err());
        assert!(settings.set_resend_initial_timeout(61).is_err());
        assert!(settings.set_num_log_files(21).is_err());
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            uplink_timeout_min: Some(30),
            max_resend_attempts: Some(42),
            ..Default::default()
        };
        assert!(settings.apply_patch(&patch).is_err());
        assert_eq!(settings.uplink.uplink_timeout_min, 60);

        let patch = SettingsPatch {
            uplink_timeout_min: Some(30),
            mailer_wait_mode: Some(MailerWaitMode::WaitForever),
            ..Default::default()
        };
        settings.apply_patch(&patch).unwrap();
        assert_eq!(settings.uplink.uplink_timeout_min, 30);
        assert_eq!(settings.uplink.mailer_wait_mode, MailerWaitMode::WaitForever);
    }

    #[test]
    fn coap_pairs_are_applied() {
        let mut settings = Settings::default();
        let block = b"SERVER_HOSTNAME\0coap.example.org\0SERVER_PORT\x005683\0DEVICE_NAME\0node-7\0";
        assert_eq!(settings.apply_coap_pairs(block).unwrap(), 3);
        assert_eq!(settings.coap.server_hostname, "coap.example.org");
        assert_eq!(settings.coap.server_port, 5683);
        assert_eq!(settings.coap.device_name, "node-7");
    }

    #[test]
    fn coap_pairs_reject_unknown_keys_atomically() {
        let mut settings = Settings::default();
        let block = b"SERVER_PORT\x005683\0COLOR\0blue\0";
        assert_eq!(
            settings.apply_coap_pairs(block),
            Err(SettingsError::UnknownKey("COLOR".to_string()))
        );
        assert_eq!(settings.coap.server_port, 5684);
    }

    #[test]
    fn coap_pairs_reject_dangling_key() {
        let mut settings = Settings::default();
        assert!(settings.apply_coap_pairs(b"SERVER_PORT\0").is_err());
        assert!(settings.apply_coap_pairs(b"").is_err());
    }

    #[test]
    fn durations_follow_units() {
        let uplink = UplinkSettings::default();
        assert_eq!(uplink.uplink_timeout(), Duration::from_secs(3600));
        assert_eq!(uplink.resend_initial_timeout(), Duration::from_secs(60));
        assert_eq!(uplink.max_resend_timeout(), Duration::from_secs(3600));
        assert_eq!(uplink.response_wait_timeout(), Duration::from_secs(10));
    }
}

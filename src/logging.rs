//! Tracing Infrastructure
//!
//! Structured, async-aware diagnostic logging for the uplink runtime, built on
//! `tracing` and `tracing-subscriber`:
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering through `RUST_LOG`
//! - Integration with the `[tracing]` configuration section
//!
//! This is the developer-facing log. The device log saved to storage and
//! uploaded on request goes through [`crate::events::EventEmitter`].
//!
//! # Example
//! ```no_run
//! use telemetry_uplink::{config::Settings, logging};
//! use tracing::{info, warn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load_from("config/uplink.toml")?;
//! logging::init_from_settings(&settings)?;
//!
//! info!("Uplink started");
//! warn!(attempt = 2, "No acknowledgement");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact format without colors (for production)
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include span events (NEW, CLOSE)
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: true,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the `[tracing]` settings section
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.tracing.level)?,
            format: parse_format(&settings.tracing.format)?,
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from loaded settings.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(TracingConfig::from_settings(settings)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed, returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        OutputFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    result.or_else(already_initialized)
}

// Tests and embedding applications may have installed a subscriber already.
fn already_initialized(e: TryInitError) -> Result<(), String> {
    if e.to_string()
        .contains("a global default trace dispatcher has already been set")
    {
        Ok(())
    } else {
        Err(format!("Failed to initialize tracing: {}", e))
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        )),
    }
}

/// Convert Level to env filter string
fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

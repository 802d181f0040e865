//! Custom error types for the uplink core.
//!
//! This module defines one `thiserror` enum per concern plus the aggregate
//! [`UplinkError`] used at the runtime boundary. The split mirrors how the
//! errors are handled rather than where they come from:
//!
//! ## Error Hierarchy
//!
//! - **`TapeError`**, **`SettingsError`**, **`CodecError`**: input validation.
//!   Returned immediately, nothing is mutated.
//! - **`ActionError`**: capacity. The single action slot is taken; the caller
//!   waits for the next safe window.
//! - **`TransportError`**: send failures and missing acknowledgements. Retried by
//!   the Mailer under its resend policy, then surfaced as a terminal event.
//! - **`FirmwareError`**: chunk or image failures. Reported, never retried
//!   automatically.
//! - **`PlatformError`**: failures of the device collaborators (flash erase,
//!   log storage).
//!
//! Unrecoverable internal inconsistencies do not get a variant: they go through
//! [`critical_error`], which stops the process instead of letting a corrupted
//! codec or protocol state keep sending data.
//!
//! By using `#[from]`, `UplinkError` can be created from any of the concern
//! errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the aggregate error type.
pub type AppResult<T> = std::result::Result<T, UplinkError>;

// =============================================================================
// Tape Errors
// =============================================================================

/// Rejections from the tape store. None of them mutate a track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TapeError {
    /// Track index is not below `MAX_TRACKS_COUNT`.
    #[error("Track index {track} out of range (tracks: {max})")]
    TrackOutOfRange {
        /// Requested track
        track: usize,
        /// Number of tracks
        max: usize,
    },

    /// Period 0 is reserved for "no period registered".
    #[error("Sampling period must be non-zero")]
    ZeroPeriod,

    /// Measurement vector is empty or wider than a column.
    #[error("Column must carry 1..={max} measurements, got {len}")]
    BadColumnWidth {
        /// Supplied vector length
        len: usize,
        /// Maximum column width
        max: usize,
    },
}

// =============================================================================
// Codec Errors
// =============================================================================

/// Failures of the message codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded uplink would exceed the transport budget.
    #[error("Encoded message is {len} bytes, budget is {max}")]
    MessageTooLarge {
        /// Encoded length
        len: usize,
        /// Allowed payload length
        max: usize,
    },

    /// The header leaves no room for even one outstanding column.
    #[error("Message header of {header} bytes leaves no room for a column (budget {max})")]
    NoRoomForColumn {
        /// Encoded header length
        header: usize,
        /// Allowed payload length
        max: usize,
    },

    /// Serializing into the message buffer failed.
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Downlink payload was empty.
    #[error("Downlink payload is empty")]
    EmptyPayload,

    /// Downlink payload is not a valid message.
    #[error("Malformed downlink: {0}")]
    Malformed(String),

    /// Downlink header carries an unknown protocol version.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// A downlink field is outside its allowed range.
    #[error("Invalid downlink field '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

// =============================================================================
// Settings Errors
// =============================================================================

/// Rejected configuration values. Out-of-range values are never clamped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Numeric setting outside its documented range.
    #[error("Setting '{field}' = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Setting name
        field: &'static str,
        /// Rejected value
        value: i64,
        /// Lower bound
        min: i64,
        /// Upper bound
        max: i64,
    },

    /// Semantic error in a non-numeric setting.
    #[error("Invalid setting '{field}': {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Unknown key in a CoAP key/value block.
    #[error("Unknown CoAP key '{0}'")]
    UnknownKey(String),
}

// =============================================================================
// Action Errors
// =============================================================================

/// Failures of the single-slot action queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Another action is already waiting for the safe window.
    #[error("An action is already pending ({0})")]
    SlotOccupied(&'static str),

    /// The action payload is empty or too long.
    #[error("Invalid action payload: {0}")]
    InvalidPayload(String),
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Failures reported by a [`crate::transport::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request went out but no acknowledgement arrived in time.
    #[error("No acknowledgement received")]
    NoAck,

    /// The request could not be sent.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// No network attachment.
    #[error("Transport not connected")]
    NotConnected,

    /// Payload exceeds what the transport accepts.
    #[error("Payload of {len} bytes exceeds transport limit of {max}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Transport limit
        max: usize,
    },
}

// =============================================================================
// Firmware Errors
// =============================================================================

/// Failures of the firmware transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    /// Empty intermediate chunk.
    #[error("Firmware chunk is empty")]
    EmptyChunk,

    /// Chunk would overflow the secondary slot.
    #[error("Firmware image exceeds slot size ({size} > {capacity})")]
    ImageTooLarge {
        /// Image size after this chunk
        size: usize,
        /// Slot capacity
        capacity: usize,
    },

    /// Chunk arrived after the last one, or commit without a complete image.
    #[error("Firmware transfer in wrong state: {0}")]
    InvalidState(&'static str),

    /// The server image does not match the announced size.
    #[error("Firmware image length mismatch: announced {announced}, server sent {received} (more: {more})")]
    SizeMismatch {
        /// Size from the upgrade command
        announced: usize,
        /// Bytes received including this block
        received: usize,
        /// Whether the server reported further blocks
        more: bool,
    },

    /// The image store failed.
    #[error("Image store error: {0}")]
    Store(String),

    /// Fetching a block from the server failed.
    #[error("Firmware download failed: {0}")]
    Download(#[from] TransportError),
}

// =============================================================================
// Platform Errors
// =============================================================================

/// Failures of the device collaborators.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// I/O failure (log files, flash emulation).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not supported by this device.
    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

// =============================================================================
// Terminal Errors
// =============================================================================

/// Failures of a terminal command. Each maps to a negative result code
/// reported back to the collector.
#[derive(Error, Debug)]
pub enum TerminalError {
    /// No command byte.
    #[error("Empty terminal command")]
    Empty,

    /// Command code not handled by the device.
    #[error("Unsupported terminal command {0:#04x}")]
    Unsupported(u8),

    /// The device operation failed.
    #[error("Terminal command failed: {0}")]
    Platform(#[from] PlatformError),
}

impl TerminalError {
    /// Result code sent in the uplink.
    pub fn code(&self) -> i32 {
        match self {
            TerminalError::Empty => -22,
            TerminalError::Unsupported(_) => -95,
            TerminalError::Platform(_) => -5,
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Primary error type of the uplink runtime.
#[derive(Error, Debug)]
pub enum UplinkError {
    /// Configuration file could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration value rejected.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Tape store rejection.
    #[error("Tape error: {0}")]
    Tape(#[from] TapeError),

    /// Codec failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Action queue rejection.
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Firmware transfer failure.
    #[error("Firmware error: {0}")]
    Firmware(#[from] FirmwareError),

    /// Device collaborator failure.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Terminal command failure.
    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),

    /// Runtime is not running or a worker stopped.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<figment::Error> for UplinkError {
    fn from(value: figment::Error) -> Self {
        UplinkError::Config(Box::new(value))
    }
}

/// Stops the process after an unrecoverable internal inconsistency.
///
/// Continuing with a corrupted codec or protocol state risks sending malformed
/// data, so this is the only path allowed to take the device down.
pub fn critical_error(reason: &str) -> ! {
    tracing::error!(reason, "Critical error, resetting");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_error_converts_into_aggregate() {
        let err: UplinkError = TapeError::TrackOutOfRange { track: 12, max: 12 }.into();
        assert!(matches!(err, UplinkError::Tape(_)));
        assert_eq!(
            err.to_string(),
            "Tape error: Track index 12 out of range (tracks: 12)"
        );
    }

    #[test]
    fn out_of_range_message_names_bounds() {
        let err = SettingsError::OutOfRange {
            field: "max_resend_attempts",
            value: 11,
            min: 1,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "Setting 'max_resend_attempts' = 11 is outside 1..=10"
        );
    }

    #[test]
    fn transport_error_wraps_into_firmware_error() {
        let err: FirmwareError = TransportError::NoAck.into();
        assert_eq!(
            err.to_string(),
            "Firmware download failed: No acknowledgement received"
        );
    }
}

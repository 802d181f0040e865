//! Validation helpers for configuration values.
//!
//! Every setter in [`crate::config`] goes through these so that a rejected value
//! always produces the same [`SettingsError`] shape.

use crate::error::SettingsError;
use std::ops::RangeInclusive;

/// Maximum length of a CoAP resource path or device name.
pub const MAX_NAME_LEN: usize = 64;

/// Validates that `value` lies within `range`.
///
/// # Arguments
///
/// * `field` - Setting name reported in the error.
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(SettingsError::OutOfRange)` otherwise. The value is never clamped.
pub fn in_range<T>(field: &'static str, value: T, range: RangeInclusive<T>) -> Result<(), SettingsError>
where
    T: PartialOrd + Copy + Into<i64>,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value: value.into(),
            min: (*range.start()).into(),
            max: (*range.end()).into(),
        })
    }
}

/// Validates that a port number is not 0, which is reserved.
pub fn valid_port(field: &'static str, port: u16) -> Result<(), SettingsError> {
    in_range(field, port, 1..=u16::MAX)
}

/// Validates that a string is not empty.
pub fn not_empty(field: &'static str, value: &str) -> Result<(), SettingsError> {
    if value.is_empty() {
        return Err(SettingsError::Invalid {
            field,
            reason: "value cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Validates a CoAP resource path or device name.
///
/// Names must be non-empty, at most [`MAX_NAME_LEN`] bytes, and free of
/// whitespace and NUL bytes.
pub fn valid_name(field: &'static str, value: &str) -> Result<(), SettingsError> {
    not_empty(field, value)?;
    if value.len() > MAX_NAME_LEN {
        return Err(SettingsError::Invalid {
            field,
            reason: format!("longer than {MAX_NAME_LEN} bytes"),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c == '\0') {
        return Err(SettingsError::Invalid {
            field,
            reason: "contains whitespace or NUL".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_accepts_bounds() {
        assert!(in_range("x", 5u16, 5..=1440).is_ok());
        assert!(in_range("x", 1440u16, 5..=1440).is_ok());
    }

    #[test]
    fn in_range_rejects_without_clamping() {
        let err = in_range("uplink_timeout_min", 4u16, 5..=1440).unwrap_err();
        assert_eq!(
            err,
            SettingsError::OutOfRange {
                field: "uplink_timeout_min",
                value: 4,
                min: 5,
                max: 1440
            }
        );
    }

    #[test]
    fn port_zero_is_reserved() {
        assert!(valid_port("port", 0).is_err());
        assert!(valid_port("port", 5684).is_ok());
    }

    #[test]
    fn names_reject_whitespace_and_overlong() {
        assert!(valid_name("r", "sensor/data").is_ok());
        assert!(valid_name("r", "").is_err());
        assert!(valid_name("r", "bad name").is_err());
        assert!(valid_name("r", &"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}

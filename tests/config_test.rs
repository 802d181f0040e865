//! Settings loading from TOML files and environment overrides.

use serial_test::serial;
use std::io::Write;
use telemetry_uplink::config::{LogLevel, MailerWaitMode, Settings};
use telemetry_uplink::error::{SettingsError, UplinkError};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn test_sample_config_loads() {
    let settings = Settings::load_from("config/uplink.toml").expect("sample config is valid");
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
        [uplink]
        max_resend_attempts = 7
        mailer_wait_mode = "wait_forever"

        [storage]
        log_level = "warnings"
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();

    assert_eq!(settings.uplink.max_resend_attempts, 7);
    assert_eq!(settings.uplink.mailer_wait_mode, MailerWaitMode::WaitForever);
    assert_eq!(settings.storage.log_level, LogLevel::Warnings);
    assert_eq!(settings.uplink.uplink_timeout_min, 60);
    assert_eq!(settings.coap.server_port, 5684);
}

#[test]
#[serial]
fn test_out_of_range_value_is_rejected() {
    let file = write_config(
        r#"
        [uplink]
        uplink_timeout_min = 2
        "#,
    );
    let err = Settings::load_from(file.path()).unwrap_err();
    assert!(matches!(
        err,
        UplinkError::Settings(SettingsError::OutOfRange {
            field: "uplink_timeout_min",
            value: 2,
            ..
        })
    ));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [uplink]
        max_resend_attempts = 7
        "#,
    );
    std::env::set_var("UPLINK_UPLINK__MAX_RESEND_ATTEMPTS", "9");
    let result = Settings::load_from(file.path());
    std::env::remove_var("UPLINK_UPLINK__MAX_RESEND_ATTEMPTS");

    assert_eq!(result.unwrap().uplink.max_resend_attempts, 9);
}

#[test]
#[serial]
fn test_type_mismatch_is_a_config_error() {
    let file = write_config(
        r#"
        [uplink]
        queue_depth = "deep"
        "#,
    );
    assert!(matches!(
        Settings::load_from(file.path()),
        Err(UplinkError::Config(_))
    ));
}

//! Built-in terminal commands executed against device and transport doubles.

mod common;

use common::{RecordingDevice, ScriptedTransport};
use telemetry_uplink::error::TerminalError;
use telemetry_uplink::terminal::{run_terminal_cmd, REBOOT_GRACE};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_erase_command() {
    let device = RecordingDevice::new();
    let transport = ScriptedTransport::new();

    run_terminal_cmd(b"E", device.as_ref(), transport.as_ref())
        .await
        .unwrap();

    assert_eq!(device.erases(), 1);
    assert_eq!(device.reboots(), 0);
    assert_eq!(transport.shutdowns(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_shuts_transport_down_and_waits() {
    let device = RecordingDevice::new();
    let transport = ScriptedTransport::new();

    let started = Instant::now();
    run_terminal_cmd(b"R", device.as_ref(), transport.as_ref())
        .await
        .unwrap();

    assert!(started.elapsed() >= REBOOT_GRACE);
    assert_eq!(transport.shutdowns(), 1);
    assert_eq!(device.reboots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_and_unknown_commands_are_rejected() {
    let device = RecordingDevice::new();
    let transport = ScriptedTransport::new();

    let err = run_terminal_cmd(b"", device.as_ref(), transport.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminalError::Empty));
    assert_eq!(err.code(), -22);

    let err = run_terminal_cmd(b"Zap", device.as_ref(), transport.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminalError::Unsupported(b'Z')));
    assert_eq!(err.code(), -95);

    assert_eq!(device.erases(), 0);
    assert_eq!(device.reboots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_erase_failure_maps_to_io_code() {
    let device = RecordingDevice::new();
    device.fail_erase();
    let transport = ScriptedTransport::new();

    let err = run_terminal_cmd(b"E", device.as_ref(), transport.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminalError::Platform(_)));
    assert_eq!(err.code(), -5);
}

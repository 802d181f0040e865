//! Mailer wake-up policy and boot status reporting.

mod common;

use common::{settle, trigger_only_settings, Harness};
use std::time::Duration;
use telemetry_uplink::config::{MailerWaitMode, Settings};
use telemetry_uplink::events::{SomEvent, USER_BOOT_MASK};

const MINUTE: Duration = Duration::from_secs(60);

fn timeout_settings() -> Settings {
    let mut settings = Settings::default();
    settings.uplink.mailer_wait_mode = MailerWaitMode::WaitOnTimeout;
    settings.uplink.uplink_timeout_min = 5;
    settings.uplink.no_psm_uplink_timeout_h = 1;
    settings
}

#[tokio::test(start_paused = true)]
async fn test_wait_on_timeout_sends_without_trigger() {
    let h = Harness::start(timeout_settings());
    h.runtime.add_column(0, 60, &[1]).unwrap();

    settle(4 * MINUTE).await;
    assert!(h.transport.acked().is_empty());

    settle(2 * MINUTE).await;
    let acked = h.transport.acked();
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0].tapes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_forever_sends_only_when_triggered() {
    let h = Harness::start(trigger_only_settings());
    h.runtime.add_column(0, 60, &[1]).unwrap();

    settle(24 * 60 * MINUTE).await;
    assert!(h.transport.acked().is_empty());
    assert_eq!(h.handler.count(SomEvent::UlStart), 0);

    h.runtime.trigger_mailer(false);
    settle(MINUTE).await;
    assert_eq!(h.transport.acked().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_psm_uses_the_longer_timeout() {
    let h = Harness::start(timeout_settings());
    h.transport.set_psm(false);
    h.runtime.add_column(0, 60, &[1]).unwrap();

    settle(30 * MINUTE).await;
    assert!(h.transport.acked().is_empty());

    settle(31 * MINUTE).await;
    assert_eq!(h.transport.acked().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_mode_switch_applies_at_next_idle() {
    let h = Harness::start(trigger_only_settings());
    h.runtime.set_mailer_wait_mode(MailerWaitMode::WaitOnTimeout);
    assert_eq!(h.runtime.mailer_wait_mode(), MailerWaitMode::WaitOnTimeout);

    // The Mailer re-reads the mode once the pending idle phase ends.
    h.runtime.trigger_mailer(false);
    settle(MINUTE).await;
    assert_eq!(h.transport.acked().len(), 1);

    h.runtime.add_column(0, 60, &[1]).unwrap();
    settle(61 * MINUTE).await;
    assert_eq!(h.transport.acked().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_boot_completes_once_all_system_bits_are_set() {
    let h = Harness::start(trigger_only_settings());
    settle(Duration::from_millis(10)).await;

    for event in [
        SomEvent::LoggerInitOk,
        SomEvent::PackerInitOk,
        SomEvent::MailerInitOk,
    ] {
        assert_eq!(h.handler.count(event), 1, "{event:?}");
    }
    assert_eq!(h.handler.count(SomEvent::DeviceInitOk), 1);
    assert!(h.runtime.is_device_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_user_boot_bits_gate_device_init() {
    let app_bits = 0x0003_0000;
    let h = Harness::start_with(trigger_only_settings(), |b| b.user_boot_mask(app_bits));
    settle(Duration::from_millis(10)).await;
    assert!(!h.runtime.is_device_initialized());
    assert_eq!(h.handler.count(SomEvent::DeviceInitOk), 0);

    h.runtime.set_boot_bits(0x0001_0000);
    assert!(!h.runtime.is_device_initialized());
    h.runtime.set_boot_bits(0x0002_0000);
    assert!(h.runtime.is_device_initialized());
    h.runtime.set_boot_bits(0x0002_0000);
    assert_eq!(h.handler.count(SomEvent::DeviceInitOk), 1);
    assert_eq!(app_bits & !USER_BOOT_MASK, 0);
}

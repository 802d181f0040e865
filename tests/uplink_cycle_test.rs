//! End-to-end uplink cycles: packing, delivery, retries and backpressure.

mod common;

use async_trait::async_trait;
use common::{settle, trigger_only_settings, Harness, Reply};
use std::sync::Arc;
use std::time::Duration;
use telemetry_uplink::codec::messages::UplinkEventType;
use telemetry_uplink::codec::MAX_PAYLOAD_LEN;
use telemetry_uplink::error::PlatformError;
use telemetry_uplink::events::SomEvent;
use telemetry_uplink::platform::DeviceControl;
use telemetry_uplink::tape::MAX_COLUMN_WIDTH;
use telemetry_uplink::transport::RadioQuality;

/// Device whose serial number fills almost the whole payload.
struct LongSerialDevice;

#[async_trait]
impl DeviceControl for LongSerialDevice {
    fn serial_number(&self) -> String {
        "S".repeat(MAX_PAYLOAD_LEN - 40)
    }

    async fn reboot(&self) {}

    async fn erase_storage(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_acked_message_carries_columns_and_releases_them() {
    let h = Harness::start(trigger_only_settings());
    let samples = [[10, 20, 15, 5], [11, 21, 16, 6], [12, 22, 17, 7]];
    for values in &samples {
        h.runtime.add_column(0, 300, values).unwrap();
    }
    assert_eq!(h.runtime.records_count(0).unwrap(), 3);

    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;

    let acked = h.transport.acked();
    assert_eq!(acked.len(), 1);
    let msg = &acked[0];
    assert_eq!(msg.device_sn, "TEST-0042");
    assert_eq!(msg.packet_counter, 0);
    assert_eq!(msg.event, UplinkEventType::Boot as i32);
    assert!(msg.radio.is_none());
    assert_eq!(msg.tapes.len(), 1);
    assert_eq!(msg.tapes[0].track, 0);
    assert_eq!(msg.tapes[0].periods, vec![300]);
    let values: Vec<Vec<i32>> = msg.tapes[0]
        .columns
        .iter()
        .map(|c| c.values.clone())
        .collect();
    assert_eq!(values, samples.iter().map(|s| s.to_vec()).collect::<Vec<_>>());

    assert_eq!(h.runtime.records_count(0).unwrap(), 0);
    assert_eq!(h.runtime.last_period(0).unwrap(), 300);
    assert_eq!(h.runtime.packet_counter(), 1);
    assert_eq!(h.runtime.queued_messages(), 0);
    assert_eq!(h.transport.connects(), 1);

    let events = h.handler.events();
    let pos = |event: SomEvent| {
        events
            .iter()
            .position(|e| *e == event)
            .unwrap_or_else(|| panic!("{event:?} not raised"))
    };
    assert!(pos(SomEvent::UlStart) < pos(SomEvent::PackerStarted));
    assert!(pos(SomEvent::PackerDoneOk) < pos(SomEvent::CoapStart));
    assert!(pos(SomEvent::CoapStart) < pos(SomEvent::CoapOk));
    assert!(pos(SomEvent::CoapOk) < pos(SomEvent::UlDone));
}

#[tokio::test(start_paused = true)]
async fn test_max_retries_raises_one_event_and_keeps_the_message() {
    let mut settings = trigger_only_settings();
    settings.uplink.max_resend_attempts = 3;
    let h = Harness::start(settings);
    h.transport.set_fallback(Reply::NoAck);

    h.runtime.add_column(2, 60, &[1, 2, 3]).unwrap();
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(30 * 60)).await;

    assert_eq!(h.transport.attempts().len(), 3);
    assert_eq!(h.handler.count(SomEvent::CoapNoAck), 3);
    assert_eq!(h.handler.count(SomEvent::UlRetry), 2);
    assert_eq!(h.handler.occurrences(SomEvent::UlMaxRetry), vec![(None, 3)]);
    assert_eq!(h.handler.count(SomEvent::UlDone), 0);
    assert_eq!(h.transport.shutdowns(), 1);
    assert_eq!(h.runtime.queued_messages(), 1);
    assert_eq!(h.runtime.records_count(2).unwrap(), 1);

    // The next cycle sends the same message again.
    h.transport.set_fallback(Reply::empty_ack());
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;

    let attempts = h.transport.attempts();
    let acked = h.transport.acked();
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0], attempts[0]);
    assert_eq!(h.handler.count(SomEvent::UlMaxRetry), 1);
    assert_eq!(h.runtime.queued_messages(), 0);
    assert_eq!(h.runtime.records_count(2).unwrap(), 0);
    assert_eq!(h.transport.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_grow_between_attempts() {
    let mut settings = trigger_only_settings();
    settings.uplink.max_resend_attempts = 4;
    let h = Harness::start(settings);
    h.transport.set_fallback(Reply::Fail);

    h.runtime.add_column(0, 60, &[7]).unwrap();
    h.runtime.trigger_mailer(false);

    // Attempts at t=0, +1 min, +2 min, +4 min.
    settle(Duration::from_secs(30)).await;
    assert_eq!(h.transport.attempts().len(), 1);
    settle(Duration::from_secs(60)).await;
    assert_eq!(h.transport.attempts().len(), 2);
    settle(Duration::from_secs(2 * 60)).await;
    assert_eq!(h.transport.attempts().len(), 3);
    settle(Duration::from_secs(3 * 60)).await;
    assert_eq!(h.transport.attempts().len(), 3);
    settle(Duration::from_secs(60)).await;
    assert_eq!(h.transport.attempts().len(), 4);

    assert_eq!(h.handler.count(SomEvent::CoapFail), 4);
    assert_eq!(h.handler.count(SomEvent::UlMaxRetry), 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_outbox_drops_oldest_and_releases_its_columns() {
    let mut settings = trigger_only_settings();
    settings.uplink.queue_depth = 2;
    let h = Harness::start(settings);

    for value in 0..3 {
        h.runtime.add_column(0, 60, &[value]).unwrap();
        h.runtime.trigger_data_packing(false);
        settle(Duration::from_millis(250)).await;
    }

    assert_eq!(h.handler.count(SomEvent::PackerDoneOk), 3);
    assert_eq!(h.handler.occurrences(SomEvent::DroppingOldest), vec![(None, 0)]);
    assert_eq!(h.runtime.queued_messages(), 2);
    assert_eq!(h.runtime.records_count(0).unwrap(), 2);
    assert!(h.transport.attempts().is_empty());

    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;

    let counters: Vec<u32> = h.transport.acked().iter().map(|m| m.packet_counter).collect();
    assert_eq!(counters, vec![1, 2]);
    assert_eq!(h.runtime.records_count(0).unwrap(), 0);
    assert_eq!(h.handler.count(SomEvent::DroppingOldest), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_counter_above_i32_range_is_clamped() {
    let mut settings = trigger_only_settings();
    settings.uplink.queue_depth = 1;
    let h = Harness::start(settings);
    h.runtime.set_packet_counter(u32::MAX - 1);

    for value in 0..2 {
        h.runtime.add_column(0, 60, &[value]).unwrap();
        h.runtime.trigger_data_packing(false);
        settle(Duration::from_millis(250)).await;
    }

    assert_eq!(
        h.handler.occurrences(SomEvent::DroppingOldest),
        vec![(None, i32::MAX)]
    );
    assert_eq!(h.runtime.queued_messages(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_serial_too_long_for_any_column_fails_packing_once() {
    let device = Arc::new(LongSerialDevice);
    let h = Harness::start_with(trigger_only_settings(), move |b| b.device(device));
    h.runtime.add_column(0, 60, &[i32::MIN; MAX_COLUMN_WIDTH]).unwrap();

    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(5)).await;

    assert_eq!(h.handler.count(SomEvent::PackingFailed), 1);
    assert_eq!(h.handler.count(SomEvent::PackerStarted), 1);
    assert!(h.transport.attempts().is_empty());
    assert_eq!(h.runtime.records_count(0).unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_radio_parameters_follow_the_packet_counter_limit() {
    let mut settings = trigger_only_settings();
    settings.uplink.packet_counter_limit = 5;
    let h = Harness::start(settings);

    for value in 0..18 {
        h.runtime.add_column(0, 60, &[value]).unwrap();
        h.runtime.trigger_mailer(value == 12);
        settle(Duration::from_secs(1)).await;
    }

    let acked = h.transport.acked();
    assert_eq!(acked.len(), 18);
    let with_radio: Vec<u32> = acked
        .iter()
        .filter(|m| m.radio.is_some())
        .map(|m| m.packet_counter)
        .collect();
    assert_eq!(with_radio, vec![5, 10, 12, 17]);

    let radio = acked[5].radio.unwrap();
    assert_eq!((radio.rsrp, radio.rsrq, radio.snr), (-95, -10, 12));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_radio_keeps_the_report_due() {
    let mut settings = trigger_only_settings();
    settings.uplink.packet_counter_limit = 1;
    let h = Harness::start(settings);
    h.transport.set_quality(None);

    for value in 0..3 {
        h.runtime.add_column(0, 60, &[value]).unwrap();
        h.runtime.trigger_mailer(false);
        settle(Duration::from_secs(1)).await;
    }
    assert!(h.transport.acked().iter().all(|m| m.radio.is_none()));

    h.transport.set_quality(Some(RadioQuality {
        rsrp: -101,
        rsrq: -12,
        snr: 3,
    }));
    h.runtime.add_column(0, 60, &[3]).unwrap();
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;

    let acked = h.transport.acked();
    assert_eq!(acked.len(), 4);
    assert_eq!(acked[3].radio.map(|r| r.rsrp), Some(-101));
}

#[tokio::test(start_paused = true)]
async fn test_radio_only_trigger_sends_a_message_without_columns() {
    let h = Harness::start(trigger_only_settings());

    // Flush the boot event first.
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;
    assert_eq!(h.transport.acked().len(), 1);

    h.runtime.trigger_mailer(true);
    settle(Duration::from_secs(1)).await;

    let acked = h.transport.acked();
    assert_eq!(acked.len(), 2);
    assert!(acked[1].tapes.is_empty());
    assert!(acked[1].radio.is_some());
    assert_eq!(acked[1].event, UplinkEventType::Data as i32);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_send_still_completes_the_cycle() {
    let h = Harness::start(trigger_only_settings());
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(1)).await;

    assert_eq!(h.transport.acked().len(), 1);
    assert_eq!(h.handler.count(SomEvent::UlStart), 2);
    assert_eq!(h.handler.count(SomEvent::UlDone), 2);
}

#[tokio::test(start_paused = true)]
async fn test_tape_overflow_spans_several_messages() {
    let h = Harness::start(trigger_only_settings());
    let wide = [i32::MAX; 12];
    for track in 0..4 {
        loop {
            if h.runtime.add_column(track, 60, &wide).unwrap().should_pack() {
                break;
            }
        }
    }

    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(5)).await;

    let acked = h.transport.acked();
    assert!(acked.len() > 1, "expected the tape to need several messages");
    let columns: usize = acked
        .iter()
        .flat_map(|m| m.tapes.iter())
        .map(|t| t.columns.len())
        .sum();
    assert_eq!(columns, 4 * 50);
    for track in 0..4 {
        assert_eq!(h.runtime.records_count(track).unwrap(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_keeps_queued_messages() {
    let mut settings = trigger_only_settings();
    settings.uplink.max_resend_attempts = 5;
    let h = Harness::start(settings);
    h.transport.set_fallback(Reply::NoAck);

    h.runtime.add_column(0, 60, &[1]).unwrap();
    h.runtime.trigger_mailer(false);
    settle(Duration::from_secs(10)).await;
    assert_eq!(h.transport.attempts().len(), 1);

    h.runtime.shutdown().await;
    assert_eq!(h.runtime.queued_messages(), 1);
    assert!(h.runtime.start().is_err());
}

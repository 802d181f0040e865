//! Packer worker.
//!
//! Idle until triggered, then encodes the tape's outstanding columns into one
//! message and queues it for the Mailer:
//!
//! ```text
//! Idle ──trigger──> Packing ──encode ok──> enqueue, mark columns ──> Idle
//!                      │
//!                      └──encode error──> PackingFailed ──> Idle
//! ```
//!
//! Triggers collapse into one pending wake-up. Cycles are spaced by at least
//! [`PACKER_LOOP_TIME`], and every cycle, packed or not, wakes whoever waits on
//! the packing-done signal.

use crate::codec::{EncodeContext, EncodedMessage};
use crate::codec::messages::UplinkEventType;
use crate::events::{BootBit, SomEvent};
use crate::runtime::Shared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Minimum spacing between two packing cycles.
pub const PACKER_LOOP_TIME: Duration = Duration::from_millis(100);

/// Result of one packing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOutcome {
    /// Nothing to send
    Skipped,
    /// A message was queued; `has_more` when columns did not fit
    Packed {
        /// Outstanding columns remain on the tape
        has_more: bool,
    },
    /// Encoding or enqueueing failed; nothing was queued
    Failed,
}

/// Runs the Packer until shutdown.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    shared.mark_booted(BootBit::Packer, SomEvent::PackerInitOk);
    tracing::info!("Packer started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shared.packer_trigger.notified() => {}
            _ = shutdown.changed() => break,
        }

        let outcome = pack_once(&shared).await;
        shared.packer_done.notify_waiters();
        if let PackOutcome::Packed { has_more: true } = outcome {
            shared.packer_trigger.notify_one();
        }

        tokio::select! {
            _ = tokio::time::sleep(PACKER_LOOP_TIME) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!("Packer stopped");
}

/// Runs one packing cycle.
pub(crate) async fn pack_once(shared: &Shared) -> PackOutcome {
    shared.events.emit(SomEvent::PackerStarted);

    let requested = shared.packer_radio.swap(false, Ordering::AcqRel);
    let radio = if requested || shared.counter.radio_due() {
        let quality = shared.transport.network_quality().await;
        if quality.is_none() {
            tracing::debug!("Radio parameters unavailable");
        }
        quality
    } else {
        None
    };
    let pending = *shared.pending_event.lock();

    if radio.is_none() && pending.is_none() && !shared.tape.has_outstanding() {
        tracing::trace!("Nothing to pack");
        return PackOutcome::Skipped;
    }

    let ctx = EncodeContext {
        packet_counter: shared.counter.get(),
        event: pending.map_or(UplinkEventType::Data, |p| p.event),
        radio,
        command_result: pending.and_then(|p| p.command_result),
    };

    let encoded: Result<(EncodedMessage, bool), _> = {
        let mut codec = shared.codec.lock();
        codec
            .encode_message(&shared.tape, &ctx)
            .map(|()| (codec.take_encoded(), codec.has_more()))
    };
    let (message, has_more) = match encoded {
        Ok(v) => v,
        Err(e) => {
            shared.events.emit(SomEvent::PackingFailed);
            shared.events.log_error(&format!("Packing failed: {e}"), -1);
            return PackOutcome::Failed;
        }
    };

    let mark = message.mark;
    let includes_radio = message.includes_radio;
    let depth = usize::from(shared.settings.read().uplink.queue_depth);
    match shared.outbox.enqueue(message, depth) {
        Ok(dropped) => shared.discard_dropped(dropped),
        Err(e) => {
            tracing::warn!(error = %e, "Message not queued");
            shared.events.emit(SomEvent::EnqueueFailed);
            return PackOutcome::Failed;
        }
    }

    shared.tape.mark_packed(&mark);
    shared.counter.on_packed(includes_radio);
    {
        let mut slot = shared.pending_event.lock();
        if *slot == pending {
            *slot = None;
        }
    }
    tracing::debug!(
        counter = ctx.packet_counter,
        radio = includes_radio,
        event = ?ctx.event,
        has_more,
        "Message packed"
    );
    shared.events.emit(SomEvent::PackerDoneOk);
    PackOutcome::Packed { has_more }
}

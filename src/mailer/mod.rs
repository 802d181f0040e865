//! Mailer worker.
//!
//! Owns the send/retry state machine and everything that must not overlap
//! with an in-flight exchange:
//!
//! ```text
//! Idle ──trigger / uplink timeout──> Sending ──ack──> Acked ──outbox empty──> drain action ──> Idle
//!                                       │  ▲
//!                                  fail │  │ resend timer
//!                                       ▼  │
//!                                      Retry ──attempts exhausted──> MaxRetriesExceeded ──> Idle
//! ```
//!
//! Messages leave the outbox in enqueue order, one at a time. A message that
//! exhausts its attempts goes back to the outbox front and its tape columns
//! stay in place, so the next cycle sends it again. Acknowledged messages
//! release their columns and their response body is decoded into commands,
//! settings and CoAP keys.

pub mod backoff;

use crate::actions::RequestedAction;
use crate::codec::messages::UplinkEventType;
use crate::config::MailerWaitMode;
use crate::error::{FirmwareError, PlatformError, TransportError};
use crate::events::{BootBit, SomEvent};
use crate::firmware::ChunkOutcome;
use crate::outbox::OutboundMessage;
use crate::runtime::Shared;
use crate::terminal;
use crate::transport::{Block, BlockUpload, BLOCK_SIZE};
use backoff::ResendPolicy;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Longest wait for the Packer to finish a requested cycle.
pub const PACK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How one uplink cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Outbox drained
    Done,
    /// A message exhausted its attempts
    MaxRetries,
    /// Shutdown requested mid-cycle
    Shutdown,
}

enum Delivery {
    Acked,
    GaveUp,
    Shutdown,
}

/// The Mailer task state.
pub(crate) struct Mailer {
    shared: Arc<Shared>,
    policy: Arc<dyn ResendPolicy>,
    shutdown: watch::Receiver<bool>,
    wakeups: u32,
}

impl Mailer {
    pub(crate) fn new(
        shared: Arc<Shared>,
        policy: Arc<dyn ResendPolicy>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shared,
            policy,
            shutdown,
            wakeups: 0,
        }
    }

    /// Runs the Mailer until shutdown.
    pub(crate) async fn run(mut self) {
        self.shared
            .mark_booted(BootBit::Mailer, SomEvent::MailerInitOk);
        tracing::info!("Mailer started");

        while let Some(include_radio) = self.wait_for_wake().await {
            self.rotate_logs_if_due();
            let outcome = self.uplink_cycle(include_radio).await;
            if outcome == CycleOutcome::Shutdown {
                break;
            }
            self.drain_action().await;
        }
        tracing::info!("Mailer stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Blocks until triggered or, in [`MailerWaitMode::WaitOnTimeout`], until the
    /// uplink timeout elapses. Returns `None` on shutdown.
    async fn wait_for_wake(&mut self) -> Option<bool> {
        if self.stopping() {
            return None;
        }
        let shared = Arc::clone(&self.shared);
        let (mode, timeout) = {
            let settings = shared.settings.read();
            let timeout = if shared.transport.psm_available() {
                settings.uplink.uplink_timeout()
            } else {
                settings.uplink.no_psm_uplink_timeout()
            };
            (settings.uplink.mailer_wait_mode, timeout)
        };

        match mode {
            MailerWaitMode::WaitForever => {
                tokio::select! {
                    _ = shared.mailer_trigger.notified() => {}
                    _ = self.shutdown.changed() => return None,
                }
            }
            MailerWaitMode::WaitOnTimeout => {
                tokio::select! {
                    _ = shared.mailer_trigger.notified() => {}
                    _ = tokio::time::sleep(timeout) => {
                        tracing::debug!(?timeout, "Uplink timeout elapsed");
                    }
                    _ = self.shutdown.changed() => return None,
                }
            }
        }
        if self.stopping() {
            return None;
        }
        Some(shared.mailer_radio.swap(false, Ordering::AcqRel))
    }

    fn rotate_logs_if_due(&mut self) {
        self.wakeups = self.wakeups.wrapping_add(1);
        let Some(logs) = self.shared.logs.clone() else {
            return;
        };
        let (frequency, max_size, keep) = {
            let s = self.shared.settings.read();
            (
                u32::from(s.storage.log_rotation_frequency.max(1)),
                u64::try_from(s.storage.log_file_max_size).unwrap_or(0),
                usize::from(s.storage.num_log_files),
            )
        };
        if self.wakeups % frequency != 0 {
            return;
        }
        if let Err(e) = logs.rotate(max_size, keep) {
            tracing::warn!(error = %e, "Log rotation failed");
        }
    }

    /// Packs when needed and delivers the outbox front to back.
    pub(crate) async fn uplink_cycle(&mut self, include_radio: bool) -> CycleOutcome {
        let shared = Arc::clone(&self.shared);
        shared.events.emit(SomEvent::UlStart);

        let mut radio = include_radio;
        loop {
            if shared.outbox.is_empty() {
                let needs_packing = radio
                    || shared.tape.has_outstanding()
                    || shared.pending_event.lock().is_some();
                if !needs_packing {
                    break;
                }
                self.pack_and_wait(radio).await;
                radio = false;
                if shared.outbox.is_empty() {
                    break;
                }
            }

            let Some(message) = shared.outbox.pop_front() else {
                break;
            };
            match self.deliver(message).await {
                Delivery::Acked => {}
                Delivery::GaveUp => return CycleOutcome::MaxRetries,
                Delivery::Shutdown => return CycleOutcome::Shutdown,
            }
        }

        shared.events.emit(SomEvent::UlDone);
        CycleOutcome::Done
    }

    async fn pack_and_wait(&self, include_radio: bool) {
        let done = self.shared.packer_done.notified();
        self.shared.request_packing(include_radio);
        if tokio::time::timeout(PACK_WAIT_TIMEOUT, done).await.is_err() {
            tracing::warn!("Packer did not finish in time");
        }
    }

    /// Sends one message until acknowledged or attempts are exhausted.
    async fn deliver(&mut self, message: OutboundMessage) -> Delivery {
        let shared = Arc::clone(&self.shared);
        let (attempts, initial, max, wait, connect_timeout, resource) = {
            let s = shared.settings.read();
            (
                u32::from(s.uplink.max_resend_attempts),
                s.uplink.resend_initial_timeout(),
                s.uplink.max_resend_timeout(),
                s.uplink.response_wait_timeout(),
                s.uplink.lte_connection_timeout(),
                s.coap.tx_resource.clone(),
            )
        };

        let mut failures = 0u32;
        loop {
            shared.events.emit_with(
                SomEvent::CoapStart,
                None,
                i32::try_from(message.packet_counter).unwrap_or(i32::MAX),
            );
            let result = {
                let _link = shared.transport_lock.lock().await;
                self.exchange(&resource, &message.payload, wait, connect_timeout)
                    .await
            };

            match result {
                Ok(body) => {
                    shared.events.emit(SomEvent::CoapOk);
                    shared.tape.release(&message.mark);
                    tracing::debug!(id = message.id, attempts = failures + 1, "Message acknowledged");
                    self.handle_response(&body);
                    return Delivery::Acked;
                }
                Err(TransportError::NoAck) => {
                    shared.events.emit(SomEvent::CoapNoAck);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Exchange failed");
                    shared.events.emit(SomEvent::CoapFail);
                }
            }

            failures += 1;
            if failures >= attempts {
                shared
                    .events
                    .emit_with(SomEvent::UlMaxRetry, None, failures as i32);
                shared
                    .events
                    .log_warning(&format!("Uplink gave up after {failures} attempts"));
                shared.transport.shutdown().await;
                shared.requeue(message);
                return Delivery::GaveUp;
            }

            let delay = self.policy.delay(failures, initial, max);
            shared
                .events
                .emit_with(SomEvent::UlRetry, None, failures as i32);
            tracing::info!(attempt = failures, ?delay, "Resending later");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {
                    shared.requeue(message);
                    return Delivery::Shutdown;
                }
            }
        }
    }

    async fn exchange(
        &self,
        resource: &str,
        payload: &[u8],
        wait: Duration,
        connect_timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let transport = &self.shared.transport;
        if !transport.is_connected() {
            transport.connect(connect_timeout).await?;
        }
        transport.exchange(resource, payload, wait).await
    }

    /// Routes a decoded acknowledgement body.
    fn handle_response(&self, body: &[u8]) {
        if body.is_empty() {
            return;
        }
        let shared = &self.shared;
        let decoded = shared.codec.lock().decode_message(body);
        let downlink = match decoded {
            Ok(d) => d,
            Err(e) => {
                shared
                    .events
                    .log_warning(&format!("Discarding downlink: {e}"));
                return;
            }
        };

        if let Some(command) = downlink.command {
            if let Err(e) = shared.actions.postpone(command) {
                shared
                    .events
                    .log_warning(&format!("Downlink command rejected: {e}"));
            }
        }

        if let Some(patch) = downlink.settings {
            let applied = {
                let mut settings = shared.settings.write();
                settings
                    .apply_patch(&patch)
                    .map(|()| settings.uplink.packet_counter_limit)
            };
            match applied {
                Ok(limit) => {
                    shared.counter.set_limit(limit);
                    shared.events.log_info("Settings updated from downlink");
                }
                Err(e) => shared
                    .events
                    .log_warning(&format!("Settings update rejected: {e}")),
            }
        }

        if let Some(keys) = downlink.coap_keys {
            let applied = shared.settings.write().apply_coap_pairs(&keys);
            match applied {
                Ok(n) => tracing::info!(pairs = n, "CoAP keys updated"),
                Err(e) => shared
                    .events
                    .log_warning(&format!("CoAP keys rejected: {e}")),
            }
        }
    }

    /// Executes the pending action, if any, in the window between uplinks.
    async fn drain_action(&mut self) {
        let Some(action) = self.shared.actions.take() else {
            return;
        };
        tracing::info!(action = ?action.kind(), "Running deferred action");
        match action {
            RequestedAction::UpgradeFirmware { path, size } => {
                self.upgrade_firmware(&path, size).await;
            }
            RequestedAction::ReadLogs => self.upload_logs().await,
            RequestedAction::TerminalCommand(cmd) => self.run_terminal(&cmd).await,
        }
    }

    async fn upgrade_firmware(&self, path: &str, size: u32) {
        let shared = &self.shared;
        match self.download_firmware(path, size).await {
            Ok(written) => {
                shared
                    .events
                    .log_info(&format!("Firmware image of {written} bytes ready, rebooting"));
                shared.transport.shutdown().await;
                shared.device.reboot().await;
            }
            Err(e) => {
                shared.firmware.lock().cancel();
                shared
                    .events
                    .log_error(&format!("Firmware upgrade failed: {e}"), -1);
                shared.set_uplink_event(UplinkEventType::FwUpgradeFailed, None);
                shared.request_uplink(false);
            }
        }
    }

    async fn download_firmware(&self, path: &str, size: u32) -> Result<usize, FirmwareError> {
        let shared = &self.shared;
        let (resource, retries) = {
            let s = shared.settings.read();
            (
                format!("{}/{}", s.coap.tx_fw_resource, path),
                u32::from(s.uplink.file_ul_retries),
            )
        };
        let size = size as usize;

        let _link = shared.transport_lock.lock().await;
        shared.firmware.lock().cancel();
        let mut offset = 0usize;
        loop {
            let block = self.fetch_with_retries(&resource, offset, retries).await?;
            let received = offset + block.data.len();
            let mismatch = if block.more { received >= size } else { received != size };
            if mismatch {
                return Err(FirmwareError::SizeMismatch {
                    announced: size,
                    received,
                    more: block.more,
                });
            }
            let outcome = shared.firmware.lock().save_chunk(&block.data, !block.more)?;
            offset = received;
            if outcome == ChunkOutcome::UpgradeRequested {
                break;
            }
        }
        shared.firmware.lock().commit()
    }

    async fn fetch_with_retries(
        &self,
        resource: &str,
        offset: usize,
        retries: u32,
    ) -> Result<Block, TransportError> {
        let transport = &self.shared.transport;
        let mut attempt = 1;
        loop {
            match transport.fetch_block(resource, offset, BLOCK_SIZE).await {
                Ok(block) => return Ok(block),
                Err(e) if attempt >= retries => return Err(e),
                Err(e) => {
                    tracing::debug!(offset, attempt, error = %e, "Block fetch failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn upload_logs(&self) {
        let shared = &self.shared;
        match self.send_log_files().await {
            Ok(0) => shared.events.log_info("No logs to upload"),
            Ok(files) => {
                tracing::info!(files, "Logs uploaded");
                shared.set_uplink_event(UplinkEventType::LogsSent, None);
                shared.request_uplink(false);
            }
            Err(e) => shared
                .events
                .log_error(&format!("Log upload failed: {e}"), -1),
        }
    }

    async fn send_log_files(&self) -> Result<usize, LogUploadError> {
        let shared = &self.shared;
        let Some(logs) = shared.logs.clone() else {
            return Ok(0);
        };
        let (resource, retries) = {
            let s = shared.settings.read();
            (s.coap.tx_file_resource.clone(), u32::from(s.uplink.file_ul_retries))
        };

        let mut sent = 0;
        for file in logs.seal()? {
            let data = logs.read(&file)?;
            if data.is_empty() {
                continue;
            }
            for (i, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                let block = BlockUpload {
                    resource: &resource,
                    filename: &file.name,
                    offset: i * BLOCK_SIZE,
                    total: data.len(),
                    data: chunk,
                };
                self.send_block_with_retries(block, retries).await?;
            }
            logs.remove(&file)?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn send_block_with_retries(
        &self,
        block: BlockUpload<'_>,
        retries: u32,
    ) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            let result = {
                let _link = self.shared.transport_lock.lock().await;
                self.shared.transport.send_block(block).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= retries => return Err(e),
                Err(e) => {
                    tracing::debug!(file = block.filename, offset = block.offset, error = %e, "Block upload failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn run_terminal(&self, cmd: &[u8]) {
        let shared = &self.shared;
        shared
            .events
            .emit_with(SomEvent::TerminalCmd, Some(cmd), cmd.len() as i32);
        let result = terminal::run_terminal_cmd(cmd, shared.device.as_ref(), shared.transport.as_ref()).await;
        let code = match result {
            Ok(()) => 0,
            Err(e) => {
                shared
                    .events
                    .log_warning(&format!("Terminal command failed: {e}"));
                e.code()
            }
        };
        shared.set_uplink_event(UplinkEventType::CommandResult, Some(code));
        shared.request_uplink(false);
    }
}

#[derive(Debug, thiserror::Error)]
enum LogUploadError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

//! Uplink runtime.
//!
//! [`UplinkRuntime`] owns one instance of every shared structure (tape, codec,
//! counter, outbox, action slot, firmware receiver) and the two worker tasks.
//! Each structure has its own lock; no lock is held across an `.await`. The
//! transport and firmware slot writes share one async lock so a chunk write
//! never interleaves with an exchange.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use telemetry_uplink::config::Settings;
//! use telemetry_uplink::runtime::UplinkRuntime;
//! # use telemetry_uplink::platform::DeviceControl;
//! # use telemetry_uplink::transport::Transport;
//! # async fn demo(transport: Arc<dyn Transport>, device: Arc<dyn DeviceControl>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = UplinkRuntime::builder(Settings::default())
//!     .transport(transport)
//!     .device(device)
//!     .build()?;
//! runtime.start()?;
//!
//! if runtime.add_column(0, 300, &[10, 20, 15, 5])?.should_pack() {
//!     runtime.trigger_mailer(false);
//! }
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::actions::{ActionKind, ActionQueue};
use crate::codec::messages::UplinkEventType;
use crate::codec::MessageCodec;
use crate::config::{MailerWaitMode, Settings, SharedSettings};
use crate::counter::PacketCounter;
use crate::error::{ActionError, AppResult, FirmwareError, SettingsError, TapeError, UplinkError};
use crate::events::{BootBit, BootStatus, EventEmitter, EventHandler, SomEvent};
use crate::firmware::{ChunkOutcome, FirmwareReceiver, FwUpgradeStatus, ImageStore, MemoryImageStore};
use crate::mailer::backoff::{ExponentialBackoff, ResendPolicy};
use crate::mailer::Mailer;
use crate::outbox::{OutboundMessage, Outbox};
use crate::packer;
use crate::platform::{DeviceControl, LogSink, LogSource};
use crate::tape::{ColumnSlots, TapeStore};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Secondary slot size of the default in-memory image store.
pub const DEFAULT_IMAGE_CAPACITY: usize = 1024 * 1024;

/// Event stamped into the next uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingUplinkEvent {
    pub(crate) event: UplinkEventType,
    pub(crate) command_result: Option<i32>,
}

/// State shared by the runtime API and the worker tasks.
pub(crate) struct Shared {
    pub(crate) settings: SharedSettings,
    pub(crate) tape: Arc<TapeStore>,
    pub(crate) codec: Mutex<MessageCodec>,
    pub(crate) counter: PacketCounter,
    pub(crate) outbox: Outbox,
    pub(crate) actions: ActionQueue,
    pub(crate) firmware: Mutex<FirmwareReceiver>,
    pub(crate) events: EventEmitter,
    pub(crate) boot: BootStatus,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) transport_lock: tokio::sync::Mutex<()>,
    pub(crate) device: Arc<dyn DeviceControl>,
    pub(crate) logs: Option<Arc<dyn LogSource>>,
    pub(crate) pending_event: Mutex<Option<PendingUplinkEvent>>,
    pub(crate) packer_trigger: Notify,
    pub(crate) packer_radio: AtomicBool,
    pub(crate) packer_done: Notify,
    pub(crate) mailer_trigger: Notify,
    pub(crate) mailer_radio: AtomicBool,
}

impl Shared {
    /// Wakes the Packer; radio parameters are sticky until packed.
    pub(crate) fn request_packing(&self, include_radio: bool) {
        if include_radio {
            self.packer_radio.store(true, Ordering::Release);
        }
        self.packer_trigger.notify_one();
    }

    /// Wakes the Mailer.
    pub(crate) fn request_uplink(&self, include_radio: bool) {
        if include_radio {
            self.mailer_radio.store(true, Ordering::Release);
        }
        self.mailer_trigger.notify_one();
    }

    /// Stamps `event` into the next packed message.
    pub(crate) fn set_uplink_event(&self, event: UplinkEventType, command_result: Option<i32>) {
        let previous = self.pending_event.lock().replace(PendingUplinkEvent {
            event,
            command_result,
        });
        if let Some(previous) = previous {
            tracing::debug!(?previous, ?event, "Pending uplink event replaced");
        }
    }

    /// Puts an unsent message back at the front of the outbox.
    pub(crate) fn requeue(&self, message: OutboundMessage) {
        let depth = usize::from(self.settings.read().uplink.queue_depth);
        let dropped = self.outbox.restore_front(message, depth);
        self.discard_dropped(dropped);
    }

    /// Releases the columns of messages dropped from the outbox and reports them.
    pub(crate) fn discard_dropped(&self, dropped: Vec<OutboundMessage>) {
        for old in dropped {
            self.tape.release(&old.mark);
            let counter = i32::try_from(old.packet_counter).unwrap_or(i32::MAX);
            self.events
                .emit_with(SomEvent::DroppingOldest, None, counter);
        }
    }

    /// Sets a system boot bit and raises its init event.
    pub(crate) fn mark_booted(&self, bit: BootBit, event: SomEvent) {
        self.events.emit(event);
        if self.boot.set_system(bit) {
            self.events.emit(SomEvent::DeviceInitOk);
        }
    }
}

/// Builder for [`UplinkRuntime`].
pub struct UplinkRuntimeBuilder {
    settings: Settings,
    transport: Option<Arc<dyn Transport>>,
    device: Option<Arc<dyn DeviceControl>>,
    image_store: Option<Arc<dyn ImageStore>>,
    log_source: Option<Arc<dyn LogSource>>,
    log_sink: Option<Arc<dyn LogSink>>,
    handler: Option<Arc<dyn EventHandler>>,
    policy: Arc<dyn ResendPolicy>,
    user_boot_mask: u32,
}

impl UplinkRuntimeBuilder {
    /// Transport used for every exchange. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Board operations. Required.
    pub fn device(mut self, device: Arc<dyn DeviceControl>) -> Self {
        self.device = Some(device);
        self
    }

    /// Firmware slot storage. Defaults to [`MemoryImageStore`].
    pub fn image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(store);
        self
    }

    /// Device log storage, used for saved log lines, rotation and uploads.
    pub fn log_store<L>(mut self, store: Arc<L>) -> Self
    where
        L: LogSource + LogSink + 'static,
    {
        self.log_source = Some(store.clone());
        self.log_sink = Some(store);
        self
    }

    /// Event handler. Defaults to the no-op handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Resend timer growth. Defaults to [`ExponentialBackoff`].
    pub fn resend_policy(mut self, policy: Arc<dyn ResendPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Application boot bits (16..=31) required before `DeviceInitOk`.
    pub fn user_boot_mask(mut self, mask: u32) -> Self {
        self.user_boot_mask = mask;
        self
    }

    /// Validates the settings and wires every part.
    pub fn build(self) -> AppResult<UplinkRuntime> {
        self.settings.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| UplinkError::Runtime("transport not configured".to_string()))?;
        let device = self
            .device
            .ok_or_else(|| UplinkError::Runtime("device not configured".to_string()))?;
        let image_store = self
            .image_store
            .unwrap_or_else(|| Arc::new(MemoryImageStore::new(DEFAULT_IMAGE_CAPACITY)));

        let limit = self.settings.uplink.packet_counter_limit;
        let settings = self.settings.into_shared();
        let events = EventEmitter::new(Arc::clone(&settings));
        if let Some(handler) = self.handler {
            events.set_handler(handler);
        }
        if let Some(sink) = self.log_sink {
            events.set_log_sink(sink);
        }

        let shared = Arc::new(Shared {
            settings,
            tape: Arc::new(TapeStore::new()),
            codec: Mutex::new(MessageCodec::new(device.serial_number())),
            counter: PacketCounter::new(limit),
            outbox: Outbox::new(),
            actions: ActionQueue::new(),
            firmware: Mutex::new(FirmwareReceiver::new(image_store)),
            events,
            boot: BootStatus::new(self.user_boot_mask),
            transport,
            transport_lock: tokio::sync::Mutex::new(()),
            device,
            logs: self.log_source,
            pending_event: Mutex::new(None),
            packer_trigger: Notify::new(),
            packer_radio: AtomicBool::new(false),
            packer_done: Notify::new(),
            mailer_trigger: Notify::new(),
            mailer_radio: AtomicBool::new(false),
        });

        let (shutdown, _) = watch::channel(false);
        Ok(UplinkRuntime {
            shared,
            policy: self.policy,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            fw_status: Mutex::new(None),
        })
    }
}

/// Store-and-forward uplink runtime.
pub struct UplinkRuntime {
    shared: Arc<Shared>,
    policy: Arc<dyn ResendPolicy>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    fw_status: Mutex<Option<FwUpgradeStatus>>,
}

impl std::fmt::Debug for UplinkRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UplinkRuntime")
            .field("running", &!self.tasks.lock().is_empty())
            .field("queued", &self.shared.outbox.len())
            .finish_non_exhaustive()
    }
}

impl UplinkRuntime {
    /// Starts building a runtime with `settings`.
    pub fn builder(settings: Settings) -> UplinkRuntimeBuilder {
        UplinkRuntimeBuilder {
            settings,
            transport: None,
            device: None,
            image_store: None,
            log_source: None,
            log_sink: None,
            handler: None,
            policy: Arc::new(ExponentialBackoff::default()),
            user_boot_mask: 0,
        }
    }

    /// Reports the post-boot firmware status and spawns the Packer and Mailer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> AppResult<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(UplinkError::Runtime("already started".to_string()));
        }
        if *self.shutdown.borrow() {
            return Err(UplinkError::Runtime("runtime was shut down".to_string()));
        }

        let shared = &self.shared;
        shared.mark_booted(BootBit::Logger, SomEvent::LoggerInitOk);

        let status = shared.firmware.lock().check_upgrade_status();
        if let Some(status) = status {
            let event = match status {
                FwUpgradeStatus::NoUpgrade => UplinkEventType::Boot,
                FwUpgradeStatus::Succeeded => UplinkEventType::FwUpgradeSucceeded,
                FwUpgradeStatus::Failed => UplinkEventType::FwUpgradeFailed,
            };
            tracing::info!(?status, "Firmware status after boot");
            shared.set_uplink_event(event, None);
            *self.fw_status.lock() = Some(status);
        }

        tasks.push(tokio::spawn(packer::run(
            Arc::clone(shared),
            self.shutdown.subscribe(),
        )));
        let mailer = Mailer::new(
            Arc::clone(shared),
            Arc::clone(&self.policy),
            self.shutdown.subscribe(),
        );
        tasks.push(tokio::spawn(mailer.run()));
        Ok(())
    }

    /// Stops both workers and waits for them. Queued messages are kept.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shared.outbox.close();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }

    // =========================================================================
    // Tape
    // =========================================================================

    /// Registers a sampling period on `track`.
    pub fn update_period(&self, track: usize, period: u32) -> Result<(), TapeError> {
        self.shared.tape.update_period(track, period)
    }

    /// Records a measurement column; [`ColumnSlots::Exhausted`] asks for packing.
    pub fn add_column(&self, track: usize, period: u32, measurements: &[i32]) -> Result<ColumnSlots, TapeError> {
        self.shared.tape.add_column(track, period, measurements)
    }

    /// Most recent period of `track`, 0 when unset.
    pub fn last_period(&self, track: usize) -> Result<u32, TapeError> {
        self.shared.tape.last_period(track)
    }

    /// Columns held by `track`.
    pub fn records_count(&self, track: usize) -> Result<usize, TapeError> {
        self.shared.tape.records_count(track)
    }

    /// Clears `track`, keeping its last period.
    pub fn rewind_tape(&self, track: usize) -> Result<(), TapeError> {
        self.shared.tape.rewind(track)
    }

    /// Clears every track, keeping last periods.
    pub fn restart_measurements(&self) {
        self.shared.tape.restart_measurements();
    }

    /// The shared tape.
    pub fn tape(&self) -> Arc<TapeStore> {
        Arc::clone(&self.shared.tape)
    }

    /// Whether the last encode carried new tape data.
    pub fn is_data_changed(&self) -> bool {
        self.shared.codec.lock().is_data_changed()
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Asks the Packer to pack outstanding columns.
    pub fn trigger_data_packing(&self, include_radio: bool) {
        self.shared.request_packing(include_radio);
    }

    /// Asks the Mailer to run an uplink cycle.
    pub fn trigger_mailer(&self, include_radio_on_first_packet: bool) {
        self.shared.request_uplink(include_radio_on_first_packet);
    }

    /// Current Mailer wake-up policy.
    pub fn mailer_wait_mode(&self) -> MailerWaitMode {
        self.shared.settings.read().uplink.mailer_wait_mode
    }

    /// Changes the Mailer wake-up policy, effective at its next idle phase.
    pub fn set_mailer_wait_mode(&self, mode: MailerWaitMode) {
        self.shared.settings.write().set_mailer_wait_mode(mode);
    }

    // =========================================================================
    // Packet Counter
    // =========================================================================

    /// Current packet counter.
    pub fn packet_counter(&self) -> u32 {
        self.shared.counter.get()
    }

    /// Overrides the packet counter.
    pub fn set_packet_counter(&self, value: u32) {
        self.shared.counter.set(value);
    }

    /// Resets the packet counter to 0.
    pub fn reset_packet_counter(&self) {
        self.shared.counter.reset();
    }

    /// Changes how many packs pass between radio reports.
    pub fn set_packet_counter_limit(&self, limit: u32) -> Result<(), SettingsError> {
        self.shared.settings.write().set_packet_counter_limit(limit)?;
        self.shared.counter.set_limit(limit);
        Ok(())
    }

    // =========================================================================
    // Actions and Results
    // =========================================================================

    /// Postpones a firmware upgrade to the next safe window.
    pub fn postpone_upgrade_fw(&self, path: &str, size: u32) -> Result<(), ActionError> {
        self.shared.actions.postpone_upgrade_fw(path, size)
    }

    /// Postpones a log upload to the next safe window.
    pub fn postpone_log_read(&self) -> Result<(), ActionError> {
        self.shared.actions.postpone_log_read()
    }

    /// Postpones a terminal command to the next safe window.
    pub fn postpone_terminal_cmd(&self, cmd: &[u8]) -> Result<(), ActionError> {
        self.shared.actions.postpone_terminal_cmd(cmd)
    }

    /// Kind of the pending action.
    pub fn requested_action(&self) -> ActionKind {
        self.shared.actions.requested_action()
    }

    /// Reports a command result in the next uplink and wakes the Mailer.
    pub fn send_command_result(&self, value: i32) {
        self.shared
            .set_uplink_event(UplinkEventType::CommandResult, Some(value));
        self.shared.request_uplink(false);
    }

    // =========================================================================
    // Firmware
    // =========================================================================

    /// Post-boot firmware outcome; `Some` only on the first call.
    pub fn take_fw_upgrade_status(&self) -> Option<FwUpgradeStatus> {
        self.fw_status.lock().take()
    }

    /// Saves a firmware chunk received outside the Mailer.
    pub async fn save_fw_chunk(&self, data: &[u8], is_last: bool) -> Result<ChunkOutcome, FirmwareError> {
        let _link = self.shared.transport_lock.lock().await;
        self.shared.firmware.lock().save_chunk(data, is_last)
    }

    /// Marks a received image pending and reboots into it.
    pub async fn commit_fw_and_reboot(&self) -> Result<(), FirmwareError> {
        let size = {
            let _link = self.shared.transport_lock.lock().await;
            self.shared.firmware.lock().commit()?
        };
        tracing::info!(size, "Rebooting into new image");
        self.shared.transport.shutdown().await;
        self.shared.device.reboot().await;
        Ok(())
    }

    /// Abandons a firmware transfer in progress.
    pub fn cancel_fw(&self) {
        self.shared.firmware.lock().cancel();
    }

    // =========================================================================
    // Settings, Events and Logs
    // =========================================================================

    /// Copy of the current settings.
    pub fn settings(&self) -> Settings {
        self.shared.settings.read().clone()
    }

    /// Applies `change` to a copy of the settings and keeps it only if both
    /// `change` and validation succeed.
    pub fn update_settings<F>(&self, change: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut Settings) -> Result<(), SettingsError>,
    {
        let mut settings = self.shared.settings.write();
        let mut next = settings.clone();
        change(&mut next)?;
        next.validate()?;
        self.shared.counter.set_limit(next.uplink.packet_counter_limit);
        *settings = next;
        Ok(())
    }

    /// Replaces the event handler.
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.shared.events.set_handler(handler);
    }

    /// Sets application boot bits (16..=31).
    pub fn set_boot_bits(&self, bits: u32) {
        if self.shared.boot.set_user(bits) {
            self.shared.events.emit(SomEvent::DeviceInitOk);
        }
    }

    /// Whether every required boot bit is set.
    pub fn is_device_initialized(&self) -> bool {
        self.shared.boot.is_complete()
    }

    /// Logs an error with a code.
    pub fn log_error(&self, text: &str, code: i32) {
        self.shared.events.log_error(text, code);
    }

    /// Logs a warning.
    pub fn log_warning(&self, text: &str) {
        self.shared.events.log_warning(text);
    }

    /// Logs an informative line.
    pub fn log_info(&self, text: &str) {
        self.shared.events.log_info(text);
    }

    /// Orderly transport shutdown.
    pub async fn modem_shutdown(&self) {
        let _link = self.shared.transport_lock.lock().await;
        self.shared.transport.shutdown().await;
    }

    /// Messages waiting in the outbox.
    pub fn queued_messages(&self) -> usize {
        self.shared.outbox.len()
    }
}

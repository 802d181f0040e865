//! Event notification and device log helpers.
//!
//! The runtime reports progress through a single registrable
//! [`EventHandler`], defaulting to [`NoopHandler`]. Handlers are called
//! synchronously from the worker tasks and must not block.
//!
//! [`EventEmitter`] also owns the device log helpers: a `log_*` call traces
//! the line, appends it to the configured [`LogSink`] and raises the matching
//! log event, all filtered by `storage.log_level`.

use crate::config::{LogLevel, SharedSettings};
use crate::platform::LogSink;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Events raised by the uplink core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SomEvent {
    /// Every system and application boot bit is set
    DeviceInitOk,
    /// Log storage ready
    LoggerInitOk,
    /// Packer task running
    PackerInitOk,
    /// Mailer task running
    MailerInitOk,
    /// The oldest queued message was dropped to make room
    DroppingOldest,
    /// A packing cycle started
    PackerStarted,
    /// Encoding failed; nothing was queued
    PackingFailed,
    /// The outbox refused the message
    EnqueueFailed,
    /// A message was queued
    PackerDoneOk,
    /// The Mailer woke up for an uplink cycle
    UlStart,
    /// A message exhausted its send attempts
    UlMaxRetry,
    /// A send attempt failed and will be retried
    UlRetry,
    /// The outbox was drained
    UlDone,
    /// An exchange started
    CoapStart,
    /// An exchange failed to send
    CoapFail,
    /// An exchange got no acknowledgement
    CoapNoAck,
    /// An exchange was acknowledged
    CoapOk,
    /// Error logged
    LogError,
    /// Warning logged
    LogWarning,
    /// Information logged
    LogInfo,
    /// A terminal command arrived; the payload carries its bytes
    TerminalCmd,
}

/// Receiver of runtime events.
pub trait EventHandler: Send + Sync {
    /// Called for every event, with optional payload and value.
    fn handle(&self, event: SomEvent, data: Option<&[u8]>, value: i32);
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn handle(&self, _event: SomEvent, _data: Option<&[u8]>, _value: i32) {}
}

/// Dispatches events to the registered handler.
pub struct EventEmitter {
    handler: RwLock<Arc<dyn EventHandler>>,
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    settings: SharedSettings,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("has_sink", &self.sink.read().is_some())
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter with the no-op handler and no log sink.
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            handler: RwLock::new(Arc::new(NoopHandler)),
            sink: RwLock::new(None),
            settings,
        }
    }

    /// Replaces the active handler.
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write() = handler;
    }

    /// Sets where device log lines are saved.
    pub fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Raises `event` without payload.
    pub fn emit(&self, event: SomEvent) {
        self.emit_with(event, None, 0);
    }

    /// Raises `event` with payload and value.
    pub fn emit_with(&self, event: SomEvent, data: Option<&[u8]>, value: i32) {
        tracing::trace!(?event, value, "Event");
        let handler = Arc::clone(&self.handler.read());
        handler.handle(event, data, value);
    }

    /// Logs an error line with an error code.
    pub fn log_error(&self, text: &str, code: i32) {
        tracing::error!(code, "{text}");
        self.save(LogLevel::Errors, &format!("{text} (code {code})"));
        self.emit_with(SomEvent::LogError, Some(text.as_bytes()), code);
    }

    /// Logs a warning line.
    pub fn log_warning(&self, text: &str) {
        tracing::warn!("{text}");
        if self.level() >= LogLevel::Warnings {
            self.save(LogLevel::Warnings, text);
            self.emit_with(SomEvent::LogWarning, Some(text.as_bytes()), 0);
        }
    }

    /// Logs an informative line.
    pub fn log_info(&self, text: &str) {
        tracing::info!("{text}");
        if self.level() >= LogLevel::Informative {
            self.save(LogLevel::Informative, text);
            self.emit_with(SomEvent::LogInfo, Some(text.as_bytes()), 0);
        }
    }

    fn level(&self) -> LogLevel {
        self.settings.read().storage.log_level
    }

    fn save(&self, level: LogLevel, line: &str) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            if let Err(e) = sink.append(level, line) {
                tracing::warn!(error = %e, "Failed to save log line");
            }
        }
    }
}

// =============================================================================
// Boot Status
// =============================================================================

/// System modules reporting a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BootBit {
    /// Mailer task
    Mailer = 0,
    /// Packer task
    Packer = 1,
    /// Log storage
    Logger = 2,
}

/// Bits owned by the runtime.
pub const SYSTEM_BOOT_MASK: u32 = 0b111;

/// Bits available to the application.
pub const USER_BOOT_MASK: u32 = 0xFFFF_0000;

/// Collects boot-OK bits and reports completion once.
#[derive(Debug)]
pub struct BootStatus {
    bits: AtomicU32,
    user_mask: u32,
    reported: AtomicBool,
}

impl BootStatus {
    /// `user_mask` selects the application bits (16..=31) that must be set
    /// before the device counts as initialized.
    pub fn new(user_mask: u32) -> Self {
        Self {
            bits: AtomicU32::new(0),
            user_mask: user_mask & USER_BOOT_MASK,
            reported: AtomicBool::new(false),
        }
    }

    /// Sets a system bit. Returns true exactly once, when initialization completes.
    pub fn set_system(&self, bit: BootBit) -> bool {
        self.set(1 << bit as u32)
    }

    /// Sets application bits. Bits outside 16..=31 are ignored.
    pub fn set_user(&self, bits: u32) -> bool {
        if bits & !USER_BOOT_MASK != 0 {
            tracing::warn!(bits, "Ignoring boot bits outside the application range");
        }
        self.set(bits & USER_BOOT_MASK)
    }

    /// Raw bit set.
    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// All required bits are set.
    pub fn is_complete(&self) -> bool {
        let required = SYSTEM_BOOT_MASK | self.user_mask;
        self.bits() & required == required
    }

    fn set(&self, bits: u32) -> bool {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        self.is_complete() && !self.reported.swap(true, Ordering::AcqRel)
    }
}

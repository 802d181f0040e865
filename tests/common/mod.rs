//! Shared fixtures for the integration tests: a scripted transport, a
//! recording event handler and a recording device.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_uplink::codec::messages::{DoMessage, UpMessage};
use telemetry_uplink::config::{MailerWaitMode, Settings};
use telemetry_uplink::error::{PlatformError, TransportError};
use telemetry_uplink::events::{EventHandler, SomEvent};
use telemetry_uplink::platform::DeviceControl;
use telemetry_uplink::runtime::UplinkRuntimeBuilder;
use telemetry_uplink::transport::{Block, BlockUpload, RadioQuality, Transport};
use telemetry_uplink::UplinkRuntime;

/// Scripted outcome of one exchange.
#[derive(Debug, Clone)]
pub enum Reply {
    Ack(Bytes),
    NoAck,
    Fail,
}

impl Reply {
    pub fn empty_ack() -> Self {
        Reply::Ack(Bytes::new())
    }

    pub fn downlink(msg: &DoMessage) -> Self {
        Reply::Ack(Bytes::from(msg.encode_to_vec()))
    }
}

/// One uploaded block, owned.
#[derive(Debug, Clone)]
pub struct UploadedBlock {
    pub resource: String,
    pub filename: String,
    pub offset: usize,
    pub total: usize,
    pub data: Vec<u8>,
}

type BlockHook = Box<dyn Fn(&UploadedBlock) + Send + Sync>;

/// Transport replaying scripted replies, then `fallback` once the script runs out.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    attempts: Mutex<Vec<UpMessage>>,
    acked: Mutex<Vec<UpMessage>>,
    blocks: Mutex<Vec<UploadedBlock>>,
    on_block: Mutex<Option<BlockHook>>,
    fetched: Mutex<Vec<(String, usize)>>,
    image: Mutex<Vec<u8>>,
    quality: Mutex<Option<RadioQuality>>,
    connected: AtomicBool,
    psm: AtomicBool,
    connects: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Reply::empty_ack()),
            attempts: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            blocks: Mutex::new(Vec::new()),
            on_block: Mutex::new(None),
            fetched: Mutex::new(Vec::new()),
            image: Mutex::new(Vec::new()),
            quality: Mutex::new(Some(RadioQuality {
                rsrp: -95,
                rsrq: -10,
                snr: 12,
            })),
            connected: AtomicBool::new(false),
            psm: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    /// Runs `hook` after every uploaded block.
    pub fn on_block(&self, hook: impl Fn(&UploadedBlock) + Send + Sync + 'static) {
        *self.on_block.lock() = Some(Box::new(hook));
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    pub fn set_image(&self, image: Vec<u8>) {
        *self.image.lock() = image;
    }

    pub fn set_quality(&self, quality: Option<RadioQuality>) {
        *self.quality.lock() = quality;
    }

    pub fn set_psm(&self, available: bool) {
        self.psm.store(available, Ordering::Release);
    }

    /// Every uplink the core tried to send, decoded.
    pub fn attempts(&self) -> Vec<UpMessage> {
        self.attempts.lock().clone()
    }

    /// Uplinks that were acknowledged, decoded.
    pub fn acked(&self) -> Vec<UpMessage> {
        self.acked.lock().clone()
    }

    pub fn blocks(&self) -> Vec<UploadedBlock> {
        self.blocks.lock().clone()
    }

    pub fn fetched(&self) -> Vec<(String, usize)> {
        self.fetched.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _timeout: Duration) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn exchange(
        &self,
        _resource: &str,
        payload: &[u8],
        _response_timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let up = UpMessage::decode(payload).expect("uplink payload decodes");
        self.attempts.lock().push(up.clone());
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());
        match reply {
            Reply::Ack(body) => {
                self.acked.lock().push(up);
                Ok(body)
            }
            Reply::NoAck => Err(TransportError::NoAck),
            Reply::Fail => Err(TransportError::SendFailed("scripted failure".to_string())),
        }
    }

    async fn send_block(&self, block: BlockUpload<'_>) -> Result<(), TransportError> {
        let uploaded = UploadedBlock {
            resource: block.resource.to_string(),
            filename: block.filename.to_string(),
            offset: block.offset,
            total: block.total,
            data: block.data.to_vec(),
        };
        if let Some(hook) = self.on_block.lock().as_ref() {
            hook(&uploaded);
        }
        self.blocks.lock().push(uploaded);
        Ok(())
    }

    async fn fetch_block(
        &self,
        resource: &str,
        offset: usize,
        max_len: usize,
    ) -> Result<Block, TransportError> {
        self.fetched.lock().push((resource.to_string(), offset));
        let image = self.image.lock();
        if offset >= image.len() {
            return Err(TransportError::SendFailed("offset past image end".to_string()));
        }
        let end = (offset + max_len).min(image.len());
        Ok(Block {
            data: Bytes::copy_from_slice(&image[offset..end]),
            more: end < image.len(),
        })
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn network_quality(&self) -> Option<RadioQuality> {
        *self.quality.lock()
    }

    fn psm_available(&self) -> bool {
        self.psm.load(Ordering::Acquire)
    }
}

/// Records every event in arrival order.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<(SomEvent, Option<Vec<u8>>, i32)>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SomEvent> {
        self.events.lock().iter().map(|(e, _, _)| *e).collect()
    }

    pub fn count(&self, event: SomEvent) -> usize {
        self.events.lock().iter().filter(|(e, _, _)| *e == event).count()
    }

    /// Payload and value of every occurrence of `event`.
    pub fn occurrences(&self, event: SomEvent) -> Vec<(Option<Vec<u8>>, i32)> {
        self.events
            .lock()
            .iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, d, v)| (d.clone(), *v))
            .collect()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: SomEvent, data: Option<&[u8]>, value: i32) {
        self.events
            .lock()
            .push((event, data.map(<[u8]>::to_vec), value));
    }
}

/// Device that counts reboots and erases.
#[derive(Default)]
pub struct RecordingDevice {
    reboots: AtomicUsize,
    erases: AtomicUsize,
    fail_erase: AtomicBool,
}

impl RecordingDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::Acquire)
    }

    pub fn erases(&self) -> usize {
        self.erases.load(Ordering::Acquire)
    }

    pub fn fail_erase(&self) {
        self.fail_erase.store(true, Ordering::Release);
    }
}

#[async_trait]
impl DeviceControl for RecordingDevice {
    fn serial_number(&self) -> String {
        "TEST-0042".to_string()
    }

    async fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::AcqRel);
    }

    async fn erase_storage(&self) -> Result<(), PlatformError> {
        if self.fail_erase.load(Ordering::Acquire) {
            return Err(PlatformError::Io(std::io::Error::other("flash busy")));
        }
        self.erases.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Settings where only explicit triggers wake the Mailer.
pub fn trigger_only_settings() -> Settings {
    let mut settings = Settings::default();
    settings.uplink.mailer_wait_mode = MailerWaitMode::WaitForever;
    settings
}

/// Everything a test needs to drive one runtime.
pub struct Harness {
    pub runtime: UplinkRuntime,
    pub transport: Arc<ScriptedTransport>,
    pub handler: Arc<RecordingHandler>,
    pub device: Arc<RecordingDevice>,
}

impl Harness {
    /// Builds and starts a runtime with `settings`.
    pub fn start(settings: Settings) -> Self {
        Self::start_with(settings, |builder| builder)
    }

    /// Like [`Harness::start`], with extra builder configuration.
    pub fn start_with<F>(settings: Settings, configure: F) -> Self
    where
        F: FnOnce(UplinkRuntimeBuilder) -> UplinkRuntimeBuilder,
    {
        let transport = ScriptedTransport::new();
        let handler = RecordingHandler::new();
        let device = RecordingDevice::new();
        let builder = UplinkRuntime::builder(settings)
            .transport(transport.clone())
            .device(device.clone())
            .event_handler(handler.clone());
        let runtime = configure(builder).build().expect("runtime builds");
        runtime.start().expect("runtime starts");
        Self {
            runtime,
            transport,
            handler,
            device,
        }
    }
}

/// Lets the workers run; the paused clock auto-advances while they idle.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

//! Uplink Simulator
//!
//! Runs the uplink runtime against a simulated, lossy collector link so the
//! full path (tape → Packer → Mailer → acknowledgement) can be exercised on a
//! host.
//!
//! # Usage
//!
//! Simulate two tracks for a minute with 20% lost exchanges:
//! ```bash
//! uplink-sim --config config/uplink.toml run --seconds 60 --loss 0.2
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! uplink-sim check-config config/uplink.toml
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use prost::Message;
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_uplink::codec::messages::UpMessage;
use telemetry_uplink::config::Settings;
use telemetry_uplink::error::{PlatformError, TransportError};
use telemetry_uplink::events::{EventHandler, SomEvent};
use telemetry_uplink::logging;
use telemetry_uplink::logstore::FileLogStore;
use telemetry_uplink::platform::DeviceControl;
use telemetry_uplink::transport::{Block, BlockUpload, RadioQuality, Transport};
use telemetry_uplink::UplinkRuntime;

#[derive(Parser)]
#[command(name = "uplink-sim")]
#[command(about = "Telemetry uplink simulator", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the runtime against a simulated collector
    Run {
        /// Simulation length in seconds
        #[arg(long, default_value = "30")]
        seconds: u64,

        /// Probability that an exchange is not acknowledged
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Number of simulated sensor tracks
        #[arg(long, default_value = "2")]
        tracks: usize,

        /// Sampling period in milliseconds
        #[arg(long, default_value = "250")]
        period_ms: u32,

        /// Request an uplink every this many samples per track
        #[arg(long, default_value = "20")]
        uplink_every: u32,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => {
            let settings = Settings::load_from(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            println!("{} is valid", path.display());
            println!("{settings:#?}");
            Ok(())
        }
        Commands::Run {
            seconds,
            loss,
            tracks,
            period_ms,
            uplink_every,
        } => {
            let settings = match &cli.config {
                Some(path) => Settings::load_from(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Settings::default(),
            };
            logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;
            run(settings, seconds, loss, tracks, period_ms, uplink_every.max(1)).await
        }
    }
}

async fn run(
    settings: Settings,
    seconds: u64,
    loss: f64,
    tracks: usize,
    period_ms: u32,
    uplink_every: u32,
) -> Result<()> {
    let logs = Arc::new(FileLogStore::open(&settings.storage.log_dir)?);
    let transport = Arc::new(SimTransport::new(loss));
    let runtime = UplinkRuntime::builder(settings)
        .transport(transport.clone())
        .device(Arc::new(SimDevice))
        .log_store(logs)
        .event_handler(Arc::new(TracingHandler))
        .build()?;
    runtime.start()?;
    if let Some(status) = runtime.take_fw_upgrade_status() {
        tracing::info!(?status, "Firmware status");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(period_ms.max(1))));
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut sample: u32 = 0;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }
        sample = sample.wrapping_add(1);
        let mut full = false;
        for track in 0..tracks {
            let values = simulated_sample(track, sample);
            full |= runtime.add_column(track, period_ms, &values)?.should_pack();
        }
        if full || sample % uplink_every == 0 {
            runtime.trigger_mailer(false);
        }
    }

    runtime.shutdown().await;
    println!(
        "Delivered {} messages, {} lost, {} still queued",
        transport.acked.load(Ordering::Relaxed),
        transport.lost.load(Ordering::Relaxed),
        runtime.queued_messages()
    );
    Ok(())
}

fn simulated_sample(track: usize, sample: u32) -> Vec<i32> {
    let mut rng = rand::thread_rng();
    let base = (track as i32 + 1) * 100;
    vec![
        base + (sample % 50) as i32,
        base - rng.gen_range(0..10),
        rng.gen_range(-500..500),
    ]
}

/// Collector link that drops a fraction of exchanges.
struct SimTransport {
    loss: f64,
    connected: AtomicBool,
    acked: AtomicU64,
    lost: AtomicU64,
}

impl SimTransport {
    fn new(loss: f64) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
            connected: AtomicBool::new(false),
            acked: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn connect(&self, _timeout: Duration) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.connected.store(true, Ordering::Release);
        tracing::info!("Simulated network attached");
        Ok(())
    }

    async fn exchange(
        &self,
        resource: &str,
        payload: &[u8],
        _response_timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if rand::thread_rng().gen_bool(self.loss) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::NoAck);
        }
        let up = UpMessage::decode(payload)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let columns: usize = up.tapes.iter().map(|t| t.columns.len()).sum();
        tracing::info!(
            resource,
            bytes = payload.len(),
            counter = up.packet_counter,
            columns,
            radio = up.radio.is_some(),
            "Collector received message"
        );
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(Bytes::new())
    }

    async fn send_block(&self, block: BlockUpload<'_>) -> Result<(), TransportError> {
        tracing::info!(
            file = block.filename,
            offset = block.offset,
            total = block.total,
            "Collector received block"
        );
        Ok(())
    }

    async fn fetch_block(
        &self,
        _resource: &str,
        _offset: usize,
        _max_len: usize,
    ) -> Result<Block, TransportError> {
        Err(TransportError::SendFailed("no firmware on simulated collector".to_string()))
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        tracing::warn!("Simulated network detached");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn network_quality(&self) -> Option<RadioQuality> {
        let mut rng = rand::thread_rng();
        Some(RadioQuality {
            rsrp: rng.gen_range(-120..-80),
            rsrq: rng.gen_range(-20..-3),
            snr: rng.gen_range(-5..25),
        })
    }
}

struct SimDevice;

#[async_trait]
impl DeviceControl for SimDevice {
    fn serial_number(&self) -> String {
        "SIM-0001".to_string()
    }

    async fn reboot(&self) {
        tracing::warn!("Simulated reboot requested");
    }

    async fn erase_storage(&self) -> Result<(), PlatformError> {
        tracing::warn!("Simulated storage erase");
        Ok(())
    }
}

struct TracingHandler;

impl EventHandler for TracingHandler {
    fn handle(&self, event: SomEvent, _data: Option<&[u8]>, value: i32) {
        tracing::debug!(?event, value, "Uplink event");
    }
}

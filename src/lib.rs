//! # Telemetry Uplink Core Library
//!
//! Store-and-forward telemetry uplink for IoT edge devices. Periodic sensor
//! samples are accumulated on a bounded multi-track tape, packed into compact
//! protobuf messages and delivered to a remote collector over a confirmed
//! request/response transport, with bounded retries, drop-oldest backpressure
//! and a firmware-update side channel.
//!
//! ## Crate Structure
//!
//! - **`tape`**: The multi-track measurement ring (`TapeStore`).
//! - **`codec`**: Protobuf uplink encoding and downlink decoding (`MessageCodec`).
//! - **`counter`**: Packet sequence counter and radio-parameter amortization.
//! - **`outbox`**: Bounded FIFO between the Packer and the Mailer.
//! - **`packer`**: Worker turning outstanding columns into queued messages.
//! - **`mailer`**: Worker delivering messages with retries and routing downlinks.
//!   Resend growth laws live in `mailer::backoff`.
//! - **`actions`**: Single-slot deferred action queue.
//! - **`firmware`**: Chunked firmware receiver over a dual-slot image store.
//! - **`transport`**: The `Transport` trait the core drives.
//! - **`platform`**: Device collaborators (`DeviceControl`, log sink and source).
//! - **`events`**: Event enumeration, handler registration, boot status and log helpers.
//! - **`terminal`**: Built-in terminal commands.
//! - **`logstore`**: File-backed rotating device log.
//! - **`config`**: Figment-based settings with validated setters.
//! - **`validation`**: Range and name checks shared by the settings.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: Error enums per concern and the aggregate `UplinkError`.
//! - **`runtime`**: `UplinkRuntime`, wiring everything and spawning the workers.

pub mod actions;
pub mod codec;
pub mod config;
pub mod counter;
pub mod error;
pub mod events;
pub mod firmware;
pub mod logging;
pub mod logstore;
pub mod mailer;
pub mod outbox;
pub mod packer;
pub mod platform;
pub mod runtime;
pub mod tape;
pub mod terminal;
pub mod transport;
pub mod validation;

pub use error::{AppResult, UplinkError};
pub use runtime::UplinkRuntime;

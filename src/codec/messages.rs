//! Protobuf wire messages exchanged with the collector.
//!
//! Declared with `prost` derives directly instead of generated from a `.proto`
//! file, so no build script or `protoc` is needed. Field tags are part of the
//! wire contract and must never be reused.

/// Uplink event tag stamped into every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UplinkEventType {
    /// Regular measurement data
    Data = 0,
    /// The image running now was confirmed after an upgrade
    FwUpgradeSucceeded = 1,
    /// The upgraded image was rejected and the previous one restored
    FwUpgradeFailed = 2,
    /// Requested logs were uploaded
    LogsSent = 3,
    /// Result of a terminal command is attached
    CommandResult = 4,
    /// First message after boot
    Boot = 5,
}

/// Message sent from the device to the collector.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpMessage {
    /// Device serial number
    #[prost(string, tag = "1")]
    pub device_sn: ::prost::alloc::string::String,
    /// Packet sequence counter
    #[prost(uint32, tag = "2")]
    pub packet_counter: u32,
    /// Uplink event tag
    #[prost(enumeration = "UplinkEventType", tag = "3")]
    pub event: i32,
    /// One record per track with outstanding columns
    #[prost(message, repeated, tag = "4")]
    pub tapes: ::prost::alloc::vec::Vec<TapeRecord>,
    /// Radio quality, present every `packet_counter_limit` messages
    #[prost(message, optional, tag = "5")]
    pub radio: ::core::option::Option<RadioParams>,
    /// Terminal command result
    #[prost(sint32, optional, tag = "6")]
    pub command_result: ::core::option::Option<i32>,
    /// Wire protocol version
    #[prost(uint32, tag = "7")]
    pub protocol_version: u32,
}

/// Outstanding columns of one track.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TapeRecord {
    /// Track index
    #[prost(uint32, tag = "1")]
    pub track: u32,
    /// Sampling periods referenced by `columns`, oldest first
    #[prost(uint32, repeated, tag = "2")]
    pub periods: ::prost::alloc::vec::Vec<u32>,
    /// Columns, oldest first
    #[prost(message, repeated, tag = "3")]
    pub columns: ::prost::alloc::vec::Vec<ColumnRecord>,
}

/// One measurement column.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnRecord {
    /// Index into the record's `periods`
    #[prost(uint32, tag = "1")]
    pub period_index: u32,
    /// Measurement values
    #[prost(sint32, repeated, tag = "2")]
    pub values: ::prost::alloc::vec::Vec<i32>,
}

/// Radio quality parameters.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RadioParams {
    /// Reference signal received power, dBm
    #[prost(sint32, tag = "1")]
    pub rsrp: i32,
    /// Reference signal received quality, dB
    #[prost(sint32, tag = "2")]
    pub rsrq: i32,
    /// Signal to noise ratio, dB
    #[prost(sint32, tag = "3")]
    pub snr: i32,
}

/// Message received from the collector in an acknowledgement body.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoMessage {
    /// Wire protocol version
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
    /// At most one command
    #[prost(oneof = "Command", tags = "2, 3, 4")]
    pub command: ::core::option::Option<Command>,
    /// Settings to change
    #[prost(message, optional, tag = "5")]
    pub settings: ::core::option::Option<SettingsUpdate>,
    /// CoAP `key\0value\0` block
    #[prost(bytes = "vec", tag = "6")]
    pub coap_keys: ::prost::alloc::vec::Vec<u8>,
}

/// Downlink command.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Command {
    /// Download and install a firmware image
    #[prost(message, tag = "2")]
    UpgradeFw(FirmwareUpgrade),
    /// Upload the saved logs
    #[prost(bool, tag = "3")]
    ReadLogs(bool),
    /// Run a terminal command
    #[prost(bytes, tag = "4")]
    TerminalCmd(::prost::alloc::vec::Vec<u8>),
}

/// Firmware image location.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FirmwareUpgrade {
    /// Image path on the firmware resource
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    /// Image size in bytes
    #[prost(uint32, tag = "2")]
    pub size: u32,
}

/// Partial settings update; absent fields are left unchanged.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SettingsUpdate {
    /// Uplink timeout, minutes
    #[prost(uint32, optional, tag = "1")]
    pub uplink_timeout_min: ::core::option::Option<u32>,
    /// Initial resend delay, minutes
    #[prost(uint32, optional, tag = "2")]
    pub resend_initial_timeout_min: ::core::option::Option<u32>,
    /// Resend delay cap, hours
    #[prost(uint32, optional, tag = "3")]
    pub max_resend_timeout_h: ::core::option::Option<u32>,
    /// Attempts per message
    #[prost(uint32, optional, tag = "4")]
    pub max_resend_attempts: ::core::option::Option<u32>,
    /// Response wait, seconds
    #[prost(uint32, optional, tag = "5")]
    pub response_wait_timeout_s: ::core::option::Option<u32>,
    /// Packed messages between radio reports
    #[prost(uint32, optional, tag = "6")]
    pub packet_counter_limit: ::core::option::Option<u32>,
    /// 0 errors, 1 warnings, 2 informative
    #[prost(uint32, optional, tag = "7")]
    pub log_level: ::core::option::Option<u32>,
    /// Wake only on trigger
    #[prost(bool, optional, tag = "8")]
    pub mailer_wait_forever: ::core::option::Option<bool>,
}

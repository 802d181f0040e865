//! Request/response transport seam.
//!
//! The uplink core does not implement the datagram protocol itself. It drives
//! any [`Transport`]: a confirmed exchange bounded by the path MTU, plus a
//! block-wise variant used for log uploads and firmware downloads.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Payload size of one block in a block-wise transfer.
pub const BLOCK_SIZE: usize = 1024;

/// Radio link quality reported by the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioQuality {
    /// Reference signal received power, dBm
    pub rsrp: i32,
    /// Reference signal received quality, dB
    pub rsrq: i32,
    /// Signal to noise ratio, dB
    pub snr: i32,
}

/// One block of a file upload.
#[derive(Debug, Clone, Copy)]
pub struct BlockUpload<'a> {
    /// Target resource
    pub resource: &'a str,
    /// Name of the uploaded file
    pub filename: &'a str,
    /// Offset of `data` within the file
    pub offset: usize,
    /// Total file size
    pub total: usize,
    /// Block payload
    pub data: &'a [u8],
}

impl BlockUpload<'_> {
    /// True for the final block of the file.
    pub fn is_last(&self) -> bool {
        self.offset + self.data.len() >= self.total
    }
}

/// One block of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block payload
    pub data: Bytes,
    /// More blocks follow
    pub more: bool,
}

/// Confirmed request/response exchange with the collector.
///
/// Implementations are expected to handle their own link-layer retransmission;
/// a returned [`TransportError::NoAck`] means the exchange is considered lost.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attaches to the network, waiting at most `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Sends `payload` to `resource` and returns the acknowledgement body.
    async fn exchange(
        &self,
        resource: &str,
        payload: &[u8],
        response_timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Uploads one block of a file.
    async fn send_block(&self, block: BlockUpload<'_>) -> Result<(), TransportError>;

    /// Downloads up to `max_len` bytes of `resource` starting at `offset`.
    async fn fetch_block(
        &self,
        resource: &str,
        offset: usize,
        max_len: usize,
    ) -> Result<Block, TransportError>;

    /// Tears the connection down.
    async fn shutdown(&self);

    /// Whether the network is attached.
    fn is_connected(&self) -> bool;

    /// Current radio quality, if the modem can report it.
    async fn network_quality(&self) -> Option<RadioQuality>;

    /// Whether the network granted a power-saving mode.
    fn psm_available(&self) -> bool {
        true
    }
}

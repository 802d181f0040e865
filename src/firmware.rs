//! Chunked firmware receiver for a dual-image slot layout.
//!
//! Chunks are appended to the secondary (inactive) slot. The last chunk does
//! not commit anything: it returns [`ChunkOutcome::UpgradeRequested`] and the
//! caller decides to [`FirmwareReceiver::commit`] (mark the image pending and
//! reboot) or [`FirmwareReceiver::cancel`]. After the reboot the bootloader
//! either runs the new image unconfirmed or reverts it, and
//! [`FirmwareReceiver::check_upgrade_status`] reports which happened, once.

use crate::error::FirmwareError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Bootloader view of the two slots after a reboot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootRecord {
    /// Running a pending image that still needs confirmation
    pub running_unconfirmed: bool,
    /// The pending image failed and the previous one was restored
    pub secondary_rejected: bool,
}

/// Dual-slot image storage.
pub trait ImageStore: Send + Sync {
    /// Size of the secondary slot in bytes.
    fn capacity(&self) -> usize;

    /// Erases the secondary slot.
    fn erase_secondary(&self) -> Result<(), FirmwareError>;

    /// Writes `data` at `offset` of the secondary slot.
    fn write_secondary(&self, offset: usize, data: &[u8]) -> Result<(), FirmwareError>;

    /// Marks the secondary image to be tried on next boot.
    fn mark_pending(&self) -> Result<(), FirmwareError>;

    /// Bootloader record of the current boot.
    fn boot_record(&self) -> BootRecord;

    /// Confirms the running image so it is kept.
    fn confirm(&self) -> Result<(), FirmwareError>;
}

/// Result of a saved chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks expected
    Continue,
    /// Image complete; commit and reboot to apply it
    UpgradeRequested,
}

/// Outcome of the last upgrade, reported after boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwUpgradeStatus {
    /// No upgrade was attempted
    NoUpgrade,
    /// The new image runs and was confirmed
    Succeeded,
    /// The new image was rejected
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Idle,
    Receiving,
    Complete,
}

/// Receives an image chunk by chunk.
pub struct FirmwareReceiver {
    store: Arc<dyn ImageStore>,
    state: TransferState,
    written: usize,
    status_reported: bool,
}

impl std::fmt::Debug for FirmwareReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareReceiver")
            .field("state", &self.state)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl FirmwareReceiver {
    /// Creates a receiver writing into `store`.
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self {
            store,
            state: TransferState::Idle,
            written: 0,
            status_reported: false,
        }
    }

    /// Appends a chunk; the first chunk erases the secondary slot.
    pub fn save_chunk(&mut self, data: &[u8], is_last: bool) -> Result<ChunkOutcome, FirmwareError> {
        if self.state == TransferState::Complete {
            return Err(FirmwareError::InvalidState("chunk after last block"));
        }
        if data.is_empty() && !is_last {
            return Err(FirmwareError::EmptyChunk);
        }
        if self.state == TransferState::Idle {
            self.store.erase_secondary()?;
            self.written = 0;
            self.state = TransferState::Receiving;
        }

        let size = self.written + data.len();
        if size > self.store.capacity() {
            self.cancel();
            return Err(FirmwareError::ImageTooLarge {
                size,
                capacity: self.store.capacity(),
            });
        }
        if let Err(e) = self.store.write_secondary(self.written, data) {
            self.cancel();
            return Err(e);
        }
        self.written = size;

        if !is_last {
            return Ok(ChunkOutcome::Continue);
        }
        if self.written == 0 {
            self.cancel();
            return Err(FirmwareError::InvalidState("empty image"));
        }
        self.state = TransferState::Complete;
        tracing::info!(size = self.written, "Firmware image received");
        Ok(ChunkOutcome::UpgradeRequested)
    }

    /// Marks the received image pending. The caller reboots afterwards.
    pub fn commit(&mut self) -> Result<usize, FirmwareError> {
        if self.state != TransferState::Complete {
            return Err(FirmwareError::InvalidState("no complete image"));
        }
        self.store.mark_pending()?;
        self.state = TransferState::Idle;
        tracing::info!(size = self.written, "Firmware image marked pending");
        Ok(self.written)
    }

    /// Abandons the transfer in progress.
    pub fn cancel(&mut self) {
        if self.state != TransferState::Idle {
            tracing::warn!(written = self.written, "Firmware transfer cancelled");
        }
        self.state = TransferState::Idle;
        self.written = 0;
    }

    /// Bytes received in the current transfer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// A transfer is in progress or awaiting commit.
    pub fn is_in_progress(&self) -> bool {
        self.state != TransferState::Idle
    }

    /// Outcome of the last upgrade. Returns `Some` only on the first call
    /// after boot, confirming a running test image.
    pub fn check_upgrade_status(&mut self) -> Option<FwUpgradeStatus> {
        if self.status_reported {
            return None;
        }
        self.status_reported = true;

        let record = self.store.boot_record();
        let status = if record.running_unconfirmed {
            match self.store.confirm() {
                Ok(()) => FwUpgradeStatus::Succeeded,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to confirm running image");
                    FwUpgradeStatus::Failed
                }
            }
        } else if record.secondary_rejected {
            FwUpgradeStatus::Failed
        } else {
            FwUpgradeStatus::NoUpgrade
        };
        Some(status)
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

#[derive(Debug, Default)]
struct MemoryImage {
    secondary: Vec<u8>,
    pending: bool,
    record: BootRecord,
}

/// RAM-backed [`ImageStore`] for hosts without a bootloader.
///
/// Clones share the same slots. [`MemoryImageStore::reboot`] plays the
/// bootloader: a pending image becomes the running unconfirmed one.
#[derive(Debug, Clone)]
pub struct MemoryImageStore {
    capacity: usize,
    inner: Arc<Mutex<MemoryImage>>,
}

impl MemoryImageStore {
    /// Empty store with a secondary slot of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(MemoryImage::default())),
        }
    }

    /// Store whose current boot reports `record`.
    pub fn with_boot_record(capacity: usize, record: BootRecord) -> Self {
        let store = Self::new(capacity);
        store.inner.lock().record = record;
        store
    }

    /// Content of the secondary slot.
    pub fn secondary(&self) -> Vec<u8> {
        self.inner.lock().secondary.clone()
    }

    /// An image is waiting for the next boot.
    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending
    }

    /// Simulates the bootloader swapping in a pending image.
    pub fn reboot(&self) {
        let mut image = self.inner.lock();
        image.record = BootRecord {
            running_unconfirmed: image.pending,
            secondary_rejected: false,
        };
        image.pending = false;
    }
}

impl ImageStore for MemoryImageStore {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn erase_secondary(&self) -> Result<(), FirmwareError> {
        let mut image = self.inner.lock();
        image.secondary.clear();
        image.pending = false;
        Ok(())
    }

    fn write_secondary(&self, offset: usize, data: &[u8]) -> Result<(), FirmwareError> {
        let mut image = self.inner.lock();
        if offset != image.secondary.len() {
            return Err(FirmwareError::Store(format!(
                "non-sequential write at {offset}, slot holds {}",
                image.secondary.len()
            )));
        }
        image.secondary.extend_from_slice(data);
        Ok(())
    }

    fn mark_pending(&self) -> Result<(), FirmwareError> {
        self.inner.lock().pending = true;
        Ok(())
    }

    fn boot_record(&self) -> BootRecord {
        self.inner.lock().record
    }

    fn confirm(&self) -> Result<(), FirmwareError> {
        self.inner.lock().record.running_unconfirmed = false;
        Ok(())
    }
}

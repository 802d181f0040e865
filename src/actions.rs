//! Single-slot deferred action queue.
//!
//! Downlink commands that must not run concurrently with an in-flight send are
//! parked here and executed by the Mailer in the window between uplinks. Only
//! one action can wait at a time: a second postponement is rejected and the
//! pending action is kept (first wins).

use crate::error::ActionError;
use parking_lot::Mutex;

/// Largest firmware path or terminal command payload.
pub const MAX_ACTION_PARAMETERS_SIZE: usize = 255;

/// A deferred command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedAction {
    /// Download the image at `path` and reboot into it
    UpgradeFirmware {
        /// Image path on the firmware resource
        path: String,
        /// Image size in bytes
        size: u32,
    },
    /// Upload the saved logs
    ReadLogs,
    /// Hand the payload to the terminal command handler
    TerminalCommand(Vec<u8>),
}

impl RequestedAction {
    /// Discriminant of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            RequestedAction::UpgradeFirmware { .. } => ActionKind::UpgradeFirmware,
            RequestedAction::ReadLogs => ActionKind::ReadLogs,
            RequestedAction::TerminalCommand(_) => ActionKind::TerminalCommand,
        }
    }
}

/// Which action is pending, `None` when the slot is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionKind {
    /// Nothing pending
    #[default]
    None,
    /// Firmware upgrade
    UpgradeFirmware,
    /// Log upload
    ReadLogs,
    /// Terminal command
    TerminalCommand,
}

impl ActionKind {
    fn name(self) -> &'static str {
        match self {
            ActionKind::None => "none",
            ActionKind::UpgradeFirmware => "upgrade firmware",
            ActionKind::ReadLogs => "read logs",
            ActionKind::TerminalCommand => "terminal command",
        }
    }
}

/// Thread-safe single-slot holder.
#[derive(Debug, Default)]
pub struct ActionQueue {
    slot: Mutex<Option<RequestedAction>>,
}

impl ActionQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Postpones a firmware upgrade.
    pub fn postpone_upgrade_fw(&self, path: &str, size: u32) -> Result<(), ActionError> {
        check_len(path.len())?;
        self.postpone(RequestedAction::UpgradeFirmware {
            path: path.to_string(),
            size,
        })
    }

    /// Postpones a log upload.
    pub fn postpone_log_read(&self) -> Result<(), ActionError> {
        self.postpone(RequestedAction::ReadLogs)
    }

    /// Postpones a terminal command.
    pub fn postpone_terminal_cmd(&self, cmd: &[u8]) -> Result<(), ActionError> {
        check_len(cmd.len())?;
        self.postpone(RequestedAction::TerminalCommand(cmd.to_vec()))
    }

    /// Stores `action` unless another one is pending.
    pub fn postpone(&self, action: RequestedAction) -> Result<(), ActionError> {
        let mut slot = self.slot.lock();
        if let Some(pending) = slot.as_ref() {
            return Err(ActionError::SlotOccupied(pending.kind().name()));
        }
        tracing::debug!(action = action.kind().name(), "Action postponed");
        *slot = Some(action);
        Ok(())
    }

    /// Kind of the pending action.
    pub fn requested_action(&self) -> ActionKind {
        self.slot.lock().as_ref().map_or(ActionKind::None, RequestedAction::kind)
    }

    /// Removes and returns the pending action.
    pub fn take(&self) -> Option<RequestedAction> {
        self.slot.lock().take()
    }
}

fn check_len(len: usize) -> Result<(), ActionError> {
    if len == 0 || len > MAX_ACTION_PARAMETERS_SIZE {
        return Err(ActionError::InvalidPayload(format!(
            "length {len} outside 1..={MAX_ACTION_PARAMETERS_SIZE}"
        )));
    }
    Ok(())
}

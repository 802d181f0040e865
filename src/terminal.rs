//! Built-in terminal commands.
//!
//! Terminal commands arrive in downlinks as opaque bytes. The first byte
//! selects the command:
//!
//! | Code  | Action                                                  |
//! |-------|---------------------------------------------------------|
//! | `'E'` | erase the storage partition                             |
//! | `'R'` | shut the transport down, wait [`REBOOT_GRACE`], reboot  |

use crate::error::TerminalError;
use crate::platform::DeviceControl;
use crate::transport::Transport;
use std::time::Duration;

/// Erase storage.
pub const CMD_ERASE_STORAGE: u8 = b'E';

/// Reboot.
pub const CMD_REBOOT: u8 = b'R';

/// Delay between the transport shutdown and the reboot.
pub const REBOOT_GRACE: Duration = Duration::from_secs(2);

/// Executes a terminal command.
pub async fn run_terminal_cmd(
    cmd: &[u8],
    device: &dyn DeviceControl,
    transport: &dyn Transport,
) -> Result<(), TerminalError> {
    let Some(&code) = cmd.first() else {
        return Err(TerminalError::Empty);
    };
    match code {
        CMD_ERASE_STORAGE => {
            tracing::warn!("Terminal: erasing storage");
            device.erase_storage().await?;
            Ok(())
        }
        CMD_REBOOT => {
            tracing::warn!("Terminal: rebooting");
            transport.shutdown().await;
            tokio::time::sleep(REBOOT_GRACE).await;
            device.reboot().await;
            Ok(())
        }
        other => Err(TerminalError::Unsupported(other)),
    }
}

//! Error types for binding images to block devices.

use std::path::PathBuf;
use thiserror;

use crate::system::CommandError;

/// Represents errors that can occur while attaching or detaching a device.
#[derive(thiserror::Error, Debug)]
pub enum AttachError {
    /// The kernel module providing the slots could not be loaded.
    #[error("Kernel module `{module}` could not be loaded: {source}")]
    ModuleLoad {
        module: String,
        source: CommandError,
    },
    /// Another image is already bound to the slot.
    #[error("Slot {} is already bound", .0.display())]
    SlotBusy(PathBuf),
    /// Every probed slot is bound.
    #[error("No free slot among the first {0} devices")]
    NoFreeSlot(usize),
    /// The backing tool failed or is unavailable.
    #[error("{0}")]
    Command(CommandError),
}

/// Converts tool failures into AttachError.
impl From<CommandError> for AttachError {
    fn from(err: CommandError) -> Self {
        AttachError::Command(err)
    }
}

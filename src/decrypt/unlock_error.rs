//! Error types for unlocking encrypted volumes.

use std::path::PathBuf;
use thiserror;

use crate::system::CommandError;

/// Represents errors that can occur while unlocking a partition.
#[derive(thiserror::Error, Debug)]
pub enum UnlockError {
    /// No key was supplied for an encrypted partition.
    #[error("No key given for encrypted partition {}", .0.display())]
    MissingKey(PathBuf),
    /// The decryptor rejected the supplied key.
    #[error("Key rejected for {}: {diagnostic}", .partition.display())]
    Rejected {
        partition: PathBuf,
        diagnostic: String,
    },
    /// The decryptor reported success but exposed no decrypted device.
    #[error("No decrypted device at {}", .0.display())]
    NoDevice(PathBuf),
    /// The decryptor failed or is unavailable.
    #[error("{0}")]
    Command(CommandError),
}

/// Converts tool failures into UnlockError.
impl From<CommandError> for UnlockError {
    fn from(err: CommandError) -> Self {
        UnlockError::Command(err)
    }
}

//! Error types for external tool invocations.

use std::io;
use std::time::Duration;
use thiserror;

/// Represents errors that can occur while running an external tool.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    /// The tool could not be located on this host.
    #[error("`{0}` is not available on this system")]
    NotFound(String),
    /// The tool exists but could not be started.
    #[error("Failed to start `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    /// The tool ran and exited with a nonzero status.
    #[error("`{program}` exited with code {status}: {diagnostic}")]
    Failed {
        program: String,
        status: i32,
        diagnostic: String,
    },
    /// The tool did not finish before the configured timeout and was terminated.
    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    /// The caller cancelled the invocation.
    #[error("`{0}` was cancelled")]
    Cancelled(String),
    /// Reading the tool's output failed.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

/// Converts standard I/O errors into CommandError.
impl From<io::Error> for CommandError {
    fn from(err: io::Error) -> Self {
        CommandError::Io(err)
    }
}

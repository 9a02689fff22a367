//! Declaration of the capabilities injected into the orchestrator.

use log::{info, warn};
use std::io::{self, Write};

use crate::error::FmountError;

/// Receives every produced mount point or key identifier.
///
/// Delivery is best effort: a failing sink is logged and never stops the pipeline.
pub trait ProgressSink {
    fn progress(&self, item: &str) -> io::Result<()>;
}

/// Receives per-item failures that do not abort the operation.
pub trait ErrorSink {
    fn report(&self, err: &FmountError);
}

/// Sink that forwards everything to the logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, err: &FmountError) {
        warn!("{err}");
    }
}

impl ProgressSink for LogSink {
    fn progress(&self, item: &str) -> io::Result<()> {
        info!("{item}");
        Ok(())
    }
}

/// Prints each item on its own line of stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn progress(&self, item: &str) -> io::Result<()> {
        writeln!(io::stdout().lock(), "{item}")
    }
}

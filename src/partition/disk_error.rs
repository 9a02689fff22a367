//! Error types for partition table and boot sector inspection.
//!
//! This module provides error handling for reading the partition table of an
//! attached device and the first sector of its partitions.

use std::io;
use thiserror;

/// Represents errors that can occur while classifying a partition.
#[derive(thiserror::Error, Debug)]
pub enum DiskError {
    /// Wraps an I/O error that occurred while reading the device.
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Indicates that the MBR boot signature is not valid.
    /// Contains the invalid signature value that was found.
    #[error("Invalid signature: 0x{0:04X}")]
    InvalidSignature(u16),
    /// The partition table has no entry for the requested partition number.
    #[error("No partition #{0} in the partition table")]
    NoSuchPartition(usize),
    /// Parsing error
    #[error("Parsing error: {0}")]
    ParsingError(String),
    /// Structure decoding error
    #[error("BinRead Error: `{0}`")]
    BinReadError(binread::Error),
}

/// Converts standard I/O errors into DiskError.
impl From<io::Error> for DiskError {
    fn from(err: io::Error) -> Self {
        DiskError::Io(err)
    }
}

/// Converts BinRead errors into DiskError.
impl From<binread::Error> for DiskError {
    fn from(err: binread::Error) -> Self {
        DiskError::BinReadError(err)
    }
}

//!
//! fmount: a library and CLI for mounting forensic disk images read-only.
//!
//! This crate provides tools for:
//! - Attaching images to network block devices and listing their partitions
//! - Classifying partitions from their MBR/GPT entries and boot sectors
//! - Unlocking BitLocker partitions through a FUSE decryptor
//! - Persisting image/device/decryption relations so that a later, unrelated
//!   invocation can tear everything down again
//! - Verifying image digests and unwrapping single-file archives
//!
//! # Re-exports
//! - [`Fmount`]: mount orchestrator
//! - [`Config`]: runtime configuration
//! - [`FmountError`]: error returned by every public operation

pub mod archive;
pub mod checksum;
pub mod commands;
pub mod config;
pub mod constants;
pub mod decrypt;
pub mod device;
pub mod error;
pub mod fmount;
pub mod partition;
pub mod relation;
pub mod system;
pub mod traits;
pub mod utils;

/// Runtime configuration (see [`config::Config`]).
pub use crate::config::Config;
/// Error taxonomy (see [`error::FmountError`]).
pub use crate::error::{FmountError, FmountResult};
/// Mount orchestrator (see [`fmount::Fmount`]).
pub use crate::fmount::Fmount;

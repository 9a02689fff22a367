//! Virtual block devices backed by disk images.

pub mod attach_error;
pub mod attacher;

use getset::{CopyGetters, Getters};
use std::path::{Path, PathBuf};

pub use attach_error::AttachError;
pub use attacher::Attacher;

/// A sub-device exposing one partition of an attached block device.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct PartitionDevice {
    /// Device node of the partition (e.g. `/dev/nbd0p1`).
    #[get = "pub"]
    node: PathBuf,
    /// Device node of the block device holding the partition table.
    #[get = "pub"]
    parent: PathBuf,
    /// 1-based position in table order; names the `p{index}` mount point.
    #[get_copy = "pub"]
    index: usize,
    /// Partition number assigned by the kernel.
    #[get_copy = "pub"]
    number: usize,
}

impl PartitionDevice {
    pub fn new(node: PathBuf, parent: &Path, index: usize, number: usize) -> Self {
        Self {
            node,
            parent: parent.to_path_buf(),
            index,
            number,
        }
    }
}

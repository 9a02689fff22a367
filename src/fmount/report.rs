//! Per-item outcomes of the orchestrated operations.

use getset::{CopyGetters, Getters};
use std::path::{Path, PathBuf};

use crate::device::PartitionDevice;
use crate::error::{FmountError, FmountResult};

/// A partition that could not be processed.
#[derive(Debug, Getters, CopyGetters)]
pub struct PartitionFailure {
    #[get = "pub"]
    partition: PathBuf,
    /// 1-based table position of the partition.
    #[get_copy = "pub"]
    index: usize,
    #[get = "pub"]
    error: FmountError,
}

impl PartitionFailure {
    pub(super) fn new(partition: &PartitionDevice, error: FmountError) -> Self {
        Self {
            partition: partition.node().clone(),
            index: partition.index(),
            error,
        }
    }
}

/// Outcome of a mount call.
#[derive(Debug, Getters)]
pub struct MountReport {
    /// Block device the image was attached to.
    #[get = "pub"]
    pub(super) device: PathBuf,
    /// Mount points created, in table order.
    #[get = "pub"]
    pub(super) mounted: Vec<PathBuf>,
    /// Partitions left out by the bootable-only filter.
    #[get = "pub"]
    pub(super) skipped: Vec<PathBuf>,
    /// Encrypted partitions left locked for lack of a key.
    #[get = "pub"]
    pub(super) locked: Vec<PathBuf>,
    #[get = "pub"]
    pub(super) failures: Vec<PartitionFailure>,
}

impl MountReport {
    pub(super) fn new(device: PathBuf) -> Self {
        Self {
            device,
            mounted: vec![],
            skipped: vec![],
            locked: vec![],
            failures: vec![],
        }
    }

    /// Consumes the report, keeping only the mount points.
    pub fn into_mount_points(self) -> Vec<PathBuf> {
        self.mounted
    }
}

/// A teardown step that failed; the relation of its resource was kept.
#[derive(Debug, Getters)]
pub struct TeardownFailure {
    #[get = "pub"]
    target: PathBuf,
    #[get = "pub"]
    error: FmountError,
}

impl TeardownFailure {
    pub(super) fn new(target: &Path, error: FmountError) -> Self {
        Self {
            target: target.to_path_buf(),
            error,
        }
    }
}

/// Outcome of an unmount call.
#[derive(Debug, Default, Getters)]
pub struct TeardownReport {
    /// Directories and devices actually unmounted.
    #[get = "pub"]
    pub(super) unmounted: Vec<PathBuf>,
    #[get = "pub"]
    pub(super) detached: Vec<PathBuf>,
    #[get = "pub"]
    pub(super) failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Returns whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns a report with failed steps into `FmountError::Teardown`.
    pub fn into_result(self) -> FmountResult<Self> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(FmountError::Teardown(self.failures))
        }
    }
}

/// Outcome of a key identification call.
#[derive(Debug, Default, Getters)]
pub struct KeyIdReport {
    /// Key-protector identifiers in discovery order, without repeats.
    #[get = "pub"]
    pub(super) ids: Vec<String>,
    #[get = "pub"]
    pub(super) failures: Vec<PartitionFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CommandError;

    #[test]
    fn failed_teardown_becomes_an_error() {
        assert!(TeardownReport::default().into_result().is_ok());

        let report = TeardownReport {
            failures: vec![TeardownFailure::new(
                Path::new("/mnt/p1"),
                FmountError::Mount {
                    target: PathBuf::from("/mnt/p1"),
                    source: CommandError::NotFound("umount".to_string()),
                },
            )],
            ..TeardownReport::default()
        };
        match report.into_result() {
            Err(FmountError::Teardown(failures)) => {
                assert_eq!(failures[0].target(), Path::new("/mnt/p1"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

//! Relations between an image and the resources created for it.
//!
//! Mount and unmount usually run as separate invocations, so everything the
//! teardown needs is persisted outside the process and keyed by image.

pub mod relation_error;
pub mod tracker;

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

pub use relation_error::RelationError;
pub use tracker::SymlinkTracker;

/// A resource that belongs to an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Block device the image is bound to.
    Device(PathBuf),
    /// Decrypted virtual device of a partition, keyed by the partition's device name.
    Decryption { partition: String, fuse_device: PathBuf },
    /// Directory the partitions were mounted under.
    MountRoot(PathBuf),
}

impl Relation {
    /// Returns the path the relation points at.
    pub fn target(&self) -> &Path {
        match self {
            Relation::Device(device) => device,
            Relation::Decryption { fuse_device, .. } => fuse_device,
            Relation::MountRoot(root) => root,
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Device(device) => write!(f, "device     {}", device.display()),
            Relation::Decryption {
                partition,
                fuse_device,
            } => write!(f, "decrypted  {partition} -> {}", fuse_device.display()),
            Relation::MountRoot(root) => write!(f, "mount-root {}", root.display()),
        }
    }
}

/// Persistent association store.
///
/// Removals are idempotent: forgetting or unlinking something already gone succeeds.
pub trait RelationStore {
    /// Records that `relation` belongs to `image`.
    fn link(&self, image: &Path, relation: &Relation) -> Result<(), RelationError>;

    /// Returns every relation of `image`; empty when none are recorded.
    fn lookup(&self, image: &Path) -> Result<Vec<Relation>, RelationError>;

    /// Returns the image owning a relation that points at `target`.
    fn reverse_lookup(&self, target: &Path) -> Result<Option<PathBuf>, RelationError>;

    /// Removes a single relation of `image`.
    fn forget(&self, image: &Path, relation: &Relation) -> Result<(), RelationError>;

    /// Removes every relation of `image`.
    fn unlink(&self, image: &Path) -> Result<(), RelationError>;
}

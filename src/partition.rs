//! Partition classification.
//!
//! This module reads the partition table of an attached device and the boot
//! sector of each partition to decide which partitions are bootable and which
//! carry a volume-encryption signature.

pub mod boot_sector;
pub mod classifier;
pub mod disk;
pub mod disk_error;
pub mod gpt;
pub mod mbr;

pub use boot_sector::Encryption;
pub use classifier::Classifier;
pub use disk::{Disk, PartitionTable};
pub use disk_error::DiskError;

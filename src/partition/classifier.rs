use log::debug;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::boot_sector::{BootSector, Encryption};
use super::disk::Disk;
use super::disk_error::DiskError;
use crate::constants;
use crate::device::PartitionDevice;
use crate::system::{CommandError, Runner};

/// Inspects partitions of an attached device.
pub struct Classifier<'a> {
    runner: &'a dyn Runner,
    sector_size: usize,
}

impl<'a> Classifier<'a> {
    pub fn new(runner: &'a dyn Runner, sector_size: usize) -> Self {
        Self {
            runner,
            sector_size,
        }
    }

    /// Returns whether the partition table of the parent device marks `partition` bootable.
    pub fn is_bootable(&self, partition: &PartitionDevice) -> Result<bool, DiskError> {
        let disk = Disk::from_file(partition.parent(), self.sector_size)?;
        let bootable = disk.is_bootable(partition.number())?;
        debug!("{}: bootable={bootable}", partition.node().display());
        Ok(bootable)
    }

    /// Returns the encryption scheme recognised in the partition's boot sector.
    pub fn encryption(&self, partition: &PartitionDevice) -> Result<Option<Encryption>, DiskError> {
        let mut f = File::open(partition.node())?;
        let boot_sector = BootSector::from(&mut f, self.sector_size)?;
        let encryption = boot_sector.encryption();
        debug!(
            "{}: oem={:?} encryption={encryption:?}",
            partition.node().display(),
            boot_sector.oem_name()
        );
        Ok(encryption)
    }

    pub fn is_encrypted(&self, partition: &PartitionDevice) -> Result<bool, DiskError> {
        Ok(self.encryption(partition)?.is_some())
    }

    /// Lists the paths currently mounted from `device` or any of its partitions.
    pub fn active_mounts(&self, device: &Path) -> Result<Vec<PathBuf>, CommandError> {
        let dev = device.to_string_lossy();
        let out = self.runner.call(
            constants::LSBLK,
            &["-l", "-n", "-o", "MOUNTPOINT", dev.as_ref()],
        )?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| PathBuf::from(unescape_hex(line)))
            .collect())
    }
}

/// Decodes the `\xHH` escapes lsblk uses for unsafe characters.
fn unescape_hex(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') && i + 4 <= bytes.len() {
            if let Some(value) = std::str::from_utf8(&bytes[i + 2..i + 4])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                output.push(value);
                i += 4;
                continue;
            }
        }
        output.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

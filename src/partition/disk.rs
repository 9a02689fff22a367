//! Partition table of an attached block device.
//!
//! This module provides functionality for:
//! - Opening a device and reading its partition table (MBR or GPT)
//! - Answering whether a numbered partition is bootable

use getset::Getters;
use log::{debug, warn};
use std::fs::File;
use std::path::Path;

use super::disk_error::DiskError;
use super::gpt::Gpt;
use super::mbr::{Mbr, PART_CNT};

/// Partition table schemes understood by the classifier.
#[derive(Debug)]
pub enum PartitionTable {
    Mbr(Mbr),
    Gpt(Gpt),
}

/// Represents a block device with its partition table.
#[derive(Debug, Getters)]
pub struct Disk {
    /// The partition table found on the device.
    #[get = "pub"]
    table: PartitionTable,
}

impl Disk {
    /// Opens a device and reads its partition table.
    ///
    /// A protective MBR is followed to the GPT behind it.
    ///
    /// # Errors
    /// - Returns `DiskError::Io` if the device cannot be opened or read
    /// - Returns `DiskError::InvalidSignature` if sector 0 holds no MBR
    pub fn from_file(path: &Path, sector_size: usize) -> Result<Self, DiskError> {
        let mut f = File::open(path)?;
        let mbr = Mbr::from(&mut f, sector_size)?;

        let table = if mbr.is_protective() {
            let gpt = Gpt::from(&mut f, sector_size)?;
            debug!(
                "{}: GPT, {} of {} slots used",
                path.display(),
                gpt.used_count(),
                gpt.header().entry_cnt()
            );
            PartitionTable::Gpt(gpt)
        } else {
            if mbr.has_overlaps() {
                warn!("{}: partition table has overlapping entries", path.display());
            }
            let types: Vec<String> = mbr
                .pt_entries()
                .iter()
                .map(|entry| entry.pt_type().to_string())
                .collect();
            debug!("{}: MBR [{}]", path.display(), types.join(", "));
            PartitionTable::Mbr(mbr)
        };

        Ok(Disk { table })
    }

    /// Returns whether the table marks partition `number` (1-based) bootable.
    ///
    /// # Errors
    /// - Returns `DiskError::NoSuchPartition` if the table has no such entry
    pub fn is_bootable(&self, number: usize) -> Result<bool, DiskError> {
        match &self.table {
            // Logical partitions live in extended boot records and are never active.
            PartitionTable::Mbr(_) if number > PART_CNT => Ok(false),
            PartitionTable::Mbr(mbr) => mbr
                .entry(number)
                .map(|entry| entry.is_active())
                .ok_or(DiskError::NoSuchPartition(number)),
            PartitionTable::Gpt(gpt) => gpt
                .entry(number)
                .map(|entry| entry.is_bootable())
                .ok_or(DiskError::NoSuchPartition(number)),
        }
    }
}

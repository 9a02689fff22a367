//! This module provides functionality for parsing Master Boot Records (MBR).
//!
//! It defines structures to interpret partition table entries, including the
//! boot indicator that marks a partition active.
use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use std::fmt::{self, Display};
use std::io;

use super::disk_error::DiskError;
use crate::utils;

/// The number of primary partitions supported by MBR.
pub const PART_CNT: usize = 4;

/// Boot indicator value of an active partition.
const ACTIVE: u8 = 0x80;

/// Represents the type of a partition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PTType {
    /// Unused table slot.
    Empty,
    /// LBA FAT32 partition type.
    LBAFat32,
    /// NTFS, exFAT or a BitLocker volume.
    Ntfs,
    /// Container for logical partitions.
    Extended,
    /// Protective entry covering a GPT disk.
    GptProtective,
    /// EFI System Partition.
    EfiSystem,
    /// Any other partition type, encapsulating the raw type byte.
    Unsupported(u8),
}

impl Display for PTType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PTType::Empty => write!(f, "Empty"),
            PTType::LBAFat32 => write!(f, "LBA FAT32"),
            PTType::Ntfs => write!(f, "NTFS/exFAT"),
            PTType::Extended => write!(f, "Extended"),
            PTType::GptProtective => write!(f, "GPT protective"),
            PTType::EfiSystem => write!(f, "EFI System"),
            PTType::Unsupported(b) => write!(f, "Unsupported: 0x{:02X}", b),
        }
    }
}

impl PTType {
    /// Creates a `PTType` instance from a raw byte.
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PTType::Empty,
            0x0C => PTType::LBAFat32,
            0x07 => PTType::Ntfs,
            0x05 | 0x0F | 0x85 => PTType::Extended,
            0xEE => PTType::GptProtective,
            0xEF => PTType::EfiSystem,
            _ => PTType::Unsupported(byte),
        }
    }
}

/// Represents a single partition table entry.
#[derive(BinRead, Debug, Getters, CopyGetters)]
#[br(little)]
pub struct PTEntry {
    /// 0x80 when the partition is active.
    #[get_copy = "pub"]
    boot_indicator: u8,
    chs_start: [u8; 3],
    /// The type of the partition.
    #[br(map = |b: u8| PTType::from_byte(b))]
    #[get = "pub"]
    pt_type: PTType,
    chs_end: [u8; 3],
    /// The starting Logical Block Address (LBA) of the partition.
    #[get_copy = "pub"]
    lba_start: u32,
    /// The number of sectors in the partition.
    #[get_copy = "pub"]
    sector_cnt: u32,
}

impl PTEntry {
    /// Returns whether the partition table marks this partition active.
    pub fn is_active(&self) -> bool {
        self.boot_indicator & ACTIVE != 0
    }
}

/// Represents the boot signature of a Master Boot Record (MBR).
#[derive(Debug)]
enum BootSignature {
    /// Standard MBR boot signature (0x55AA).
    Mbr,
    /// Unsupported boot signature, encapsulating the raw value.
    Unsupported(u16),
}

impl BootSignature {
    fn from_u16(sig: u16) -> BootSignature {
        match sig {
            // The signature 0x55AA is stored on disk in little-endian byte order.
            0xAA55 => BootSignature::Mbr,
            other => BootSignature::Unsupported(other),
        }
    }
}

/// Represents a Master Boot Record (MBR), including partition table entries
/// and the boot signature.
#[derive(BinRead, Debug)]
#[br(little)]
pub struct Mbr {
    #[br(count = 446)]
    boot_code: Vec<u8>,
    /// The partition table entries in the MBR.
    #[br(count = PART_CNT)]
    pt_entries: Vec<PTEntry>,
    /// The boot signature of the MBR.
    #[br(map = |sig: u16| BootSignature::from_u16(sig))]
    boot_signature: BootSignature,
}

impl Mbr {
    /// Reads and parses the MBR found in the first sector of a device.
    ///
    /// # Returns
    /// - `Ok(Mbr)` if the MBR is successfully parsed.
    /// - `Err(DiskError)` if the sector cannot be read or carries no MBR signature.
    pub fn from<T: io::Read + io::Seek>(file: &mut T, sector_size: usize) -> Result<Mbr, DiskError> {
        let mut buffer = vec![0; sector_size];
        utils::read_sector(file, 0, sector_size, &mut buffer)?;

        let mut reader = io::Cursor::new(buffer);
        let mbr: Mbr = reader.read_le()?;

        mbr.validate()
    }

    /// Returns the entry for a 1-based primary partition number.
    pub fn entry(&self, number: usize) -> Option<&PTEntry> {
        number
            .checked_sub(1)
            .and_then(|idx| self.pt_entries.get(idx))
            .filter(|entry| entry.sector_cnt != 0)
    }

    /// Returns a vector of references to non-empty partition table entries.
    pub fn pt_entries(&self) -> Vec<&PTEntry> {
        self.pt_entries
            .iter()
            .filter(|entry| entry.sector_cnt != 0)
            .collect()
    }

    /// Returns whether the disk uses a GPT behind a protective MBR.
    pub fn is_protective(&self) -> bool {
        self.pt_entries()
            .iter()
            .any(|entry| entry.pt_type == PTType::GptProtective)
    }

    /// Returns whether two non-empty entries share sectors.
    pub fn has_overlaps(&self) -> bool {
        let mut entries = self.pt_entries();
        entries.sort_by_key(|entry| entry.lba_start);
        entries
            .windows(2)
            .any(|pair| u64::from(pair[0].lba_start) + u64::from(pair[0].sector_cnt) > u64::from(pair[1].lba_start))
    }

    /// Validates the MBR boot signature.
    fn validate(self) -> Result<Self, DiskError> {
        match self.boot_signature {
            BootSignature::Unsupported(sig) => Err(DiskError::InvalidSignature(sig)),
            BootSignature::Mbr => Ok(self),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a sector holding an MBR with `(boot_indicator, type, lba_start, sectors)` entries.
    pub(crate) fn mbr_sector(entries: &[(u8, u8, u32, u32)]) -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        for (i, (boot, pt_type, start, count)) in entries.iter().enumerate() {
            let offset = 446 + i * 16;
            sector[offset] = *boot;
            sector[offset + 4] = *pt_type;
            sector[offset + 8..offset + 12].copy_from_slice(&start.to_le_bytes());
            sector[offset + 12..offset + 16].copy_from_slice(&count.to_le_bytes());
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn parses_active_flag_and_types() {
        let sector = mbr_sector(&[(0x80, 0x07, 2048, 1024), (0x00, 0x0C, 4096, 2048)]);
        let mbr = Mbr::from(&mut Cursor::new(sector), 512).unwrap();

        assert_eq!(mbr.pt_entries().len(), 2);
        assert!(mbr.entry(1).unwrap().is_active());
        assert_eq!(*mbr.entry(1).unwrap().pt_type(), PTType::Ntfs);
        assert!(!mbr.entry(2).unwrap().is_active());
        assert_eq!(mbr.entry(2).unwrap().lba_start(), 4096);
        assert!(mbr.entry(3).is_none());
        assert!(mbr.entry(0).is_none());
        assert!(!mbr.is_protective());
        assert!(!mbr.has_overlaps());
    }

    #[test]
    fn rejects_missing_signature() {
        let mut sector = mbr_sector(&[(0x80, 0x07, 2048, 1024)]);
        sector[510] = 0;
        match Mbr::from(&mut Cursor::new(sector), 512) {
            Err(DiskError::InvalidSignature(sig)) => assert_eq!(sig, 0xAA00),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn detects_overlapping_entries() {
        let sector = mbr_sector(&[(0, 0x07, 2048, 4096), (0, 0x07, 4096, 10)]);
        let mbr = Mbr::from(&mut Cursor::new(sector), 512).unwrap();
        assert!(mbr.has_overlaps());
    }
}

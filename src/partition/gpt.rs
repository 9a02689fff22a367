//! GUID Partition Table (GPT) parsing.
//!
//! Only the fields needed to classify partitions are interpreted: the
//! partition type GUID and the attribute flags of each entry.

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use std::io::{self, Read, Seek, SeekFrom};

use super::disk_error::DiskError;
use crate::utils;

/// Partition entries beyond this count are treated as a corrupt header.
const MAX_ENTRIES: u32 = 1024;

/// Smallest entry size allowed for a partition entry array.
const MIN_ENTRY_SIZE: u32 = 128;

/// Attribute bit marking a partition bootable by legacy BIOS.
const LEGACY_BIOS_BOOTABLE: u64 = 1 << 2;

/// EFI System Partition type GUID (C12A7328-F81F-11D2-BA4B-00A0C93EC93B) in on-disk byte order.
pub const EFI_SYSTEM_GUID: [u8; 16] = [
    0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B,
];

/// GPT header found in the sector following the protective MBR.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little, magic = b"EFI PART")]
pub struct GptHeader {
    revision: u32,
    header_size: u32,
    header_crc: u32,
    reserved: u32,
    current_lba: u64,
    backup_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: [u8; 16],
    /// First sector of the partition entry array.
    #[get_copy = "pub"]
    entries_lba: u64,
    /// Number of slots in the partition entry array.
    #[get_copy = "pub"]
    entry_cnt: u32,
    /// Size in bytes of one slot.
    #[get_copy = "pub"]
    entry_size: u32,
    entries_crc: u32,
}

/// One slot of the partition entry array.
#[derive(BinRead, Debug, Getters, CopyGetters)]
#[br(little)]
pub struct GptEntry {
    #[get = "pub"]
    type_guid: [u8; 16],
    unique_guid: [u8; 16],
    #[get_copy = "pub"]
    first_lba: u64,
    #[get_copy = "pub"]
    last_lba: u64,
    #[get_copy = "pub"]
    attributes: u64,
}

impl GptEntry {
    pub fn is_used(&self) -> bool {
        self.type_guid != [0; 16]
    }

    /// Returns whether the entry is an EFI System Partition or flagged legacy-BIOS bootable.
    pub fn is_bootable(&self) -> bool {
        self.is_used()
            && (self.type_guid == EFI_SYSTEM_GUID || self.attributes & LEGACY_BIOS_BOOTABLE != 0)
    }
}

/// A parsed GUID Partition Table.
#[derive(Debug)]
pub struct Gpt {
    header: GptHeader,
    entries: Vec<GptEntry>,
}

impl Gpt {
    /// Reads the primary GPT of a device.
    ///
    /// # Errors
    /// - `DiskError::BinReadError` if the header magic is missing
    /// - `DiskError::ParsingError` if the header describes an implausible entry array,
    ///   with entries larger than a sector or an array beyond addressable offsets
    pub fn from<T: Read + Seek>(file: &mut T, sector_size: usize) -> Result<Gpt, DiskError> {
        let mut buffer = vec![0; sector_size];
        utils::read_sector(file, 1, sector_size, &mut buffer)?;
        let header: GptHeader = io::Cursor::new(buffer).read_le()?;

        if header.entry_cnt > MAX_ENTRIES
            || header.entry_size < MIN_ENTRY_SIZE
            || header.entry_size as usize > sector_size
        {
            return Err(DiskError::ParsingError(format!(
                "implausible GPT entry array: {} entries of {} bytes",
                header.entry_cnt, header.entry_size
            )));
        }

        let offset = header
            .entries_lba
            .checked_mul(sector_size as u64)
            .ok_or_else(|| {
                DiskError::ParsingError(format!(
                    "GPT entry array LBA {} out of range",
                    header.entries_lba
                ))
            })?;
        file.seek(SeekFrom::Start(offset))?;
        let mut slot = vec![0; header.entry_size as usize];
        let mut entries: Vec<GptEntry> = Vec::with_capacity(header.entry_cnt as usize);
        for _ in 0..header.entry_cnt {
            file.read_exact(&mut slot)?;
            entries.push(io::Cursor::new(&slot).read_le()?);
        }

        Ok(Gpt { header, entries })
    }

    pub fn header(&self) -> &GptHeader {
        &self.header
    }

    /// Returns the entry for a 1-based partition number.
    ///
    /// Partition numbers follow slot positions, so unused slots keep their number.
    pub fn entry(&self, number: usize) -> Option<&GptEntry> {
        number
            .checked_sub(1)
            .and_then(|idx| self.entries.get(idx))
            .filter(|entry| entry.is_used())
    }

    /// Number of slots holding a partition.
    pub fn used_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_used()).count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds the header sector and entry array of a GPT with `(type_guid, attributes)` entries.
    pub(crate) fn gpt_sectors(entries: &[([u8; 16], u64)]) -> Vec<u8> {
        let mut data = vec![0u8; 512 * 2];
        data[..8].copy_from_slice(b"EFI PART");
        data[72..80].copy_from_slice(&2u64.to_le_bytes());
        data[80..84].copy_from_slice(&4u32.to_le_bytes());
        data[84..88].copy_from_slice(&128u32.to_le_bytes());
        for (i, (guid, attributes)) in entries.iter().enumerate() {
            let offset = 512 + i * 128;
            data[offset..offset + 16].copy_from_slice(guid);
            data[offset + 16] = i as u8 + 1;
            data[offset + 32..offset + 40].copy_from_slice(&(2048u64 * (i as u64 + 1)).to_le_bytes());
            data[offset + 48..offset + 56].copy_from_slice(&attributes.to_le_bytes());
        }
        data
    }

    #[test]
    fn reads_bootable_entries() {
        let basic_data = [0xA2; 16];
        let mut disk = vec![0u8; 512];
        disk.extend(gpt_sectors(&[
            (EFI_SYSTEM_GUID, 0),
            (basic_data, 0),
            (basic_data, LEGACY_BIOS_BOOTABLE),
        ]));

        let gpt = Gpt::from(&mut Cursor::new(disk), 512).unwrap();
        assert_eq!(gpt.header().entry_cnt(), 4);
        assert_eq!(gpt.used_count(), 3);
        assert!(gpt.entry(1).unwrap().is_bootable());
        assert!(!gpt.entry(2).unwrap().is_bootable());
        assert!(gpt.entry(3).unwrap().is_bootable());
        assert!(gpt.entry(4).is_none());
        assert_eq!(gpt.entry(2).unwrap().first_lba(), 4096);
    }

    #[test]
    fn rejects_missing_magic() {
        let disk = vec![0u8; 512 * 3];
        assert!(matches!(
            Gpt::from(&mut Cursor::new(disk), 512),
            Err(DiskError::BinReadError(_))
        ));
    }

    fn header_with(entries_lba: u64, entry_size: u32) -> Vec<u8> {
        let mut disk = vec![0u8; 512];
        disk.extend(gpt_sectors(&[(EFI_SYSTEM_GUID, 0)]));
        disk[512 + 72..512 + 80].copy_from_slice(&entries_lba.to_le_bytes());
        disk[512 + 84..512 + 88].copy_from_slice(&entry_size.to_le_bytes());
        disk
    }

    #[test]
    fn rejects_entry_array_beyond_addressable_offsets() {
        let disk = header_with(u64::MAX / 4, 128);
        assert!(matches!(
            Gpt::from(&mut Cursor::new(disk), 512),
            Err(DiskError::ParsingError(_))
        ));
    }

    #[test]
    fn rejects_oversized_entries() {
        for size in [513, 1 << 20, u32::MAX] {
            let disk = header_with(2, size);
            assert!(matches!(
                Gpt::from(&mut Cursor::new(disk), 512),
                Err(DiskError::ParsingError(_))
            ));
        }
        assert!(matches!(
            Gpt::from(&mut Cursor::new(header_with(2, 64)), 512),
            Err(DiskError::ParsingError(_))
        ));
    }
}

//! First sector of a partition, inspected for volume-encryption signatures.

use binread::{BinRead, BinReaderExt};
use std::io;

use super::disk_error::DiskError;
use crate::utils;

/// OEM identifier of a BitLocker-encrypted volume.
const BITLOCKER_SIGNATURE: &[u8; 8] = b"-FVE-FS-";

/// Volume encryption schemes that can be recognised from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    BitLocker,
}

/// Leading fields shared by FAT, NTFS and BitLocker boot sectors.
#[derive(BinRead, Debug)]
#[br(little)]
pub struct BootSector {
    /// OEM identifier (e.g., "NTFS    " or "-FVE-FS-"), after the 3-byte jump instruction
    #[br(pad_before = 3)]
    oem_name: [u8; 8],
}

impl BootSector {
    /// Reads the boot sector at the start of a partition.
    pub fn from<T: io::Read + io::Seek>(file: &mut T, sector_size: usize) -> Result<Self, DiskError> {
        let mut buf = vec![0; sector_size];
        utils::read_sector(file, 0, sector_size, &mut buf)?;

        let mut reader = io::Cursor::new(buf);
        Ok(reader.read_le()?)
    }

    pub fn oem_name(&self) -> String {
        String::from_utf8_lossy(&self.oem_name).trim_end().to_string()
    }

    /// Returns the encryption scheme whose signature this sector carries.
    pub fn encryption(&self) -> Option<Encryption> {
        if &self.oem_name == BITLOCKER_SIGNATURE {
            Some(Encryption::BitLocker)
        } else {
            None
        }
    }
}

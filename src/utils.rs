use log::debug;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::constants;

/// Reads a specific sector from a device or image into a buffer.
///
/// # Arguments
///
/// - `file`: The device or image to read from.
/// - `sector`: The sector number to read.
/// - `sector_size`: The size in bytes of a sector.
/// - `buffer`: A mutable reference to a vector where the sector data will be stored.
///
/// The buffer will be resized to match the sector size.
///
/// # Errors
///
/// Returns an `io::Error` if the sector cannot be read.
pub fn read_sector<T: Read + Seek>(
    file: &mut T,
    sector: u64,
    sector_size: usize,
    buffer: &mut Vec<u8>,
) -> io::Result<()> {
    buffer.resize(sector_size, 0);

    file.seek(SeekFrom::Start(sector_size as u64 * sector))?;

    file.read_exact(buffer).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("Failed to read sector {}: {}", sector, err),
        )
    })?;

    Ok(())
}

/// Returns the final component of `path` as a string, or an empty string.
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parses the number a device name ends with (`nbd0p3` gives 3).
pub fn trailing_number(name: &str) -> Option<usize> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

/// Removes `dir` if it is empty; an absent directory counts as removed.
pub fn remove_empty_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Returns whether `name` is a per-partition directory (`p{N}` or `p{N}-fuse`).
pub fn is_partition_dir(name: &str) -> bool {
    let name = name.strip_suffix(constants::FUSE_SUFFIX).unwrap_or(name);
    name.strip_prefix('p')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Removes the empty per-partition directories of `root`, then `root` itself
/// when it ends up empty.
///
/// Anything else under `root` is left alone, as are directories with content
/// and mount points still in use.
pub fn prune_mount_root(root: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    for entry in entries {
        let entry = entry?;
        if !is_partition_dir(&entry.file_name().to_string_lossy()) || !entry.file_type()?.is_dir() {
            continue;
        }
        if let Err(err) = fs::remove_dir(entry.path()) {
            debug!("keeping {}: {err}", entry.path().display());
        }
    }

    match fs::read_dir(root)?.next() {
        None => remove_empty_dir(root),
        Some(_) => {
            debug!("keeping non-empty {}", root.display());
            Ok(())
        }
    }
}

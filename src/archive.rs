//! Unwrapping of images shipped inside a single-file zip archive.

use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::{FmountError, FmountResult};

/// Extracts the only file of `archive` next to it and returns the extracted path.
///
/// # Errors
/// - `FmountError::ExtractAmbiguous` if the archive holds more than one file
/// - `FmountError::ExtractEmpty` if it holds none
/// - `FmountError::ExtractConflict` if the destination already exists
/// - `FmountError::Archive` for a malformed archive
///
/// Nothing is left behind on failure.
pub fn extract(archive: &Path) -> FmountResult<PathBuf> {
    let file = File::open(archive).map_err(FmountError::io(archive))?;
    let mut zip = ZipArchive::new(file).map_err(archive_error(archive))?;

    let mut files = vec![];
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(archive_error(archive))?;
        if entry.is_file() {
            files.push((i, entry.name().to_string()));
        }
    }

    let (index, name) = match files.as_slice() {
        [] => return Err(FmountError::ExtractEmpty(archive.to_path_buf())),
        [single] => single.clone(),
        _ => {
            return Err(FmountError::ExtractAmbiguous {
                archive: archive.to_path_buf(),
                entries: files.len(),
            });
        }
    };

    // Only the final component is kept, so an entry cannot escape the archive's directory.
    let file_name = Path::new(&name)
        .file_name()
        .ok_or_else(|| FmountError::ExtractEmpty(archive.to_path_buf()))?;
    let dest = archive
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(file_name);
    debug!("extracting `{name}` from {} to {}", archive.display(), dest.display());

    let mut out = match OpenOptions::new().write(true).create_new(true).open(&dest) {
        Ok(out) => out,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(FmountError::ExtractConflict(dest));
        }
        Err(err) => return Err(FmountError::io(dest)(err)),
    };

    let copied = zip
        .by_index(index)
        .map_err(archive_error(archive))
        .and_then(|mut entry| io::copy(&mut entry, &mut out).map_err(FmountError::io(&dest)));
    match copied {
        Ok(bytes) => {
            info!("extracted {} ({bytes} bytes)", dest.display());
            Ok(dest)
        }
        Err(err) => {
            drop(out);
            if let Err(remove_err) = fs::remove_file(&dest) {
                debug!("cannot remove partial {}: {remove_err}", dest.display());
            }
            Err(err)
        }
    }
}

fn archive_error(archive: &Path) -> impl FnOnce(zip::result::ZipError) -> FmountError {
    let archive = archive.to_path_buf();
    move |source| FmountError::Archive { archive, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_single_entry_next_to_archive() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("evidence.zip");
        write_archive(&archive, &[("windows.dd", b"disk contents")]);

        let dest = extract(&archive).unwrap();
        assert_eq!(dest, tmp.path().join("windows.dd"));
        assert_eq!(fs::read(&dest).unwrap(), b"disk contents");
    }

    #[test]
    fn two_entries_are_ambiguous() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("evidence.zip");
        write_archive(&archive, &[("a.dd", b"a"), ("b.dd", b"b")]);

        assert!(matches!(
            extract(&archive),
            Err(FmountError::ExtractAmbiguous { entries: 2, .. })
        ));
        assert!(!tmp.path().join("a.dd").exists());
        assert!(!tmp.path().join("b.dd").exists());
    }

    #[test]
    fn existing_destination_is_a_conflict() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("evidence.zip");
        write_archive(&archive, &[("windows.dd", b"new")]);
        fs::write(tmp.path().join("windows.dd"), b"old").unwrap();

        assert!(matches!(
            extract(&archive),
            Err(FmountError::ExtractConflict(_))
        ));
        assert_eq!(fs::read(tmp.path().join("windows.dd")).unwrap(), b"old");
    }

    #[test]
    fn archive_without_files_is_empty() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("empty.zip");
        write_archive(&archive, &[]);
        assert!(matches!(extract(&archive), Err(FmountError::ExtractEmpty(_))));
    }
}

//! Read-only mounting and the host mount table.

use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::command::Runner;
use super::command_error::CommandError;
use crate::constants;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
}

/// Parses a `/proc/mounts` snapshot.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: PathBuf::from(unescape_mount_field(target)),
            })
        })
        .collect()
}

/// Decodes the octal escapes (`\040` for a space) the kernel uses in the table.
fn unescape_mount_field(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = oct.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    output.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        output.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Mounts and unmounts through the host tools, consulting the mount table
/// so that unmounting something already gone is a no-op.
pub struct Mounter<'a> {
    runner: &'a dyn Runner,
    mount_table: &'a Path,
}

impl<'a> Mounter<'a> {
    pub fn new(runner: &'a dyn Runner, mount_table: &'a Path) -> Self {
        Self {
            runner,
            mount_table,
        }
    }

    /// Returns the current mount table.
    pub fn entries(&self) -> io::Result<Vec<MountEntry>> {
        let contents = fs::read_to_string(self.mount_table)?;
        Ok(parse_mount_table(&contents))
    }

    /// Returns whether `dir` is the target of a mount.
    pub fn is_mounted(&self, dir: &Path) -> io::Result<bool> {
        Ok(self.entries()?.iter().any(|entry| entry.target == dir))
    }

    /// Returns whether `dev` is the source of a mount.
    pub fn is_source(&self, dev: &Path) -> io::Result<bool> {
        let dev = dev.to_string_lossy();
        Ok(self.entries()?.iter().any(|entry| entry.source == dev))
    }

    /// Mounts `dev` on `dir` read-only. `loop_dev` routes a file through a loop device.
    pub fn mount(&self, dev: &Path, dir: &Path, loop_dev: bool) -> Result<(), CommandError> {
        let dev = dev.to_string_lossy();
        let dir = dir.to_string_lossy();
        let mut args = vec![];
        if loop_dev {
            args.extend(["-o", "loop"]);
        }
        args.extend(["-o", "ro", dev.as_ref(), dir.as_ref()]);
        self.runner.call(constants::MOUNT, &args)?;
        Ok(())
    }

    /// Recursively unmounts `dir`.
    ///
    /// # Returns
    /// `false` when nothing was mounted there, `true` once it was unmounted.
    pub fn unmount_dir(&self, dir: &Path) -> Result<bool, CommandError> {
        if !self.is_mounted(dir)? {
            debug!("{} is not mounted", dir.display());
            return Ok(false);
        }
        let dir = dir.to_string_lossy();
        self.runner.call(constants::UMOUNT, &["-R", dir.as_ref()])?;
        Ok(true)
    }

    /// Unmounts every mount of `dev`; returns `false` when it had none.
    pub fn unmount_dev(&self, dev: &Path) -> Result<bool, CommandError> {
        if !self.is_source(dev)? {
            debug!("{} has no mounts", dev.display());
            return Ok(false);
        }
        let dev = dev.to_string_lossy();
        self.runner.call(constants::UMOUNT, &["-A", dev.as_ref()])?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Output;
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[test]
    fn parse_mount_table_decodes_targets() {
        let snapshot = "/dev/nbd0p1 /mnt/case\\040one/p1 ntfs ro,relatime 0 0\n\
                        dislocker /mnt/case/p2-fuse fuse.dislocker ro 0 0\n";
        let entries = parse_mount_table(snapshot);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "/dev/nbd0p1");
        assert_eq!(entries[0].target, PathBuf::from("/mnt/case one/p1"));
        assert_eq!(entries[1].target, PathBuf::from("/mnt/case/p2-fuse"));
    }

    #[test]
    fn unescape_keeps_plain_backslashes() {
        assert_eq!(unescape_mount_field("/mnt/a\\b"), "/mnt/a\\b");
        assert_eq!(unescape_mount_field("/mnt/tab\\011x"), "/mnt/tab\tx");
        assert_eq!(unescape_mount_field("/mnt/end\\04"), "/mnt/end\\04");
    }

    struct Recorder(RefCell<Vec<String>>);

    impl Runner for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
            self.0
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            Ok(Output::default())
        }
    }

    #[test]
    fn unmount_consults_the_mount_table() {
        let tmp = tempdir().unwrap();
        let table = tmp.path().join("mounts");
        fs::write(&table, "/dev/nbd0p1 /mnt/p1 ntfs ro 0 0\n").unwrap();
        let runner = Recorder(RefCell::new(vec![]));
        let mounter = Mounter::new(&runner, &table);

        assert!(mounter.unmount_dir(Path::new("/mnt/p1")).unwrap());
        assert!(!mounter.unmount_dir(Path::new("/mnt/p2")).unwrap());
        assert!(mounter.unmount_dev(Path::new("/dev/nbd0p1")).unwrap());
        assert!(!mounter.unmount_dev(Path::new("/dev/nbd0p2")).unwrap());
        assert_eq!(
            *runner.0.borrow(),
            vec!["umount -R /mnt/p1".to_string(), "umount -A /dev/nbd0p1".to_string()]
        );
    }

    #[test]
    fn mount_is_read_only() {
        let tmp = tempdir().unwrap();
        let table = tmp.path().join("mounts");
        let runner = Recorder(RefCell::new(vec![]));
        let mounter = Mounter::new(&runner, &table);
        mounter
            .mount(Path::new("/mnt/p2-fuse/dislocker-file"), Path::new("/mnt/p2"), true)
            .unwrap();
        assert_eq!(
            runner.0.borrow()[0],
            "mount -o loop -o ro /mnt/p2-fuse/dislocker-file /mnt/p2"
        );
    }
}

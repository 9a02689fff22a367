//! BitLocker volumes through `dislocker`.
//!
//! Unlocking mounts a FUSE filesystem whose single file is the decrypted
//! volume; that file is then loop-mounted like any other partition.

use log::{debug, info};
use std::path::{Path, PathBuf};

use super::unlock_error::UnlockError;
use crate::constants;
use crate::system::{CommandError, Runner};

/// Groups in a BitLocker recovery password.
const RECOVERY_GROUPS: usize = 8;
const RECOVERY_GROUP_LEN: usize = 6;

/// Key material accepted by the decryptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    /// A user password.
    Password(&'a str),
    /// A 48-digit recovery password.
    Recovery(&'a str),
}

impl<'a> Key<'a> {
    /// Classifies `key`; an empty key yields `None`.
    pub fn parse(key: &'a str) -> Option<Key<'a>> {
        if key.is_empty() {
            None
        } else if is_recovery_password(key) {
            Some(Key::Recovery(key))
        } else {
            Some(Key::Password(key))
        }
    }

    fn arg(&self) -> String {
        match self {
            Key::Password(pw) => format!("-u{pw}"),
            Key::Recovery(rp) => format!("-p{rp}"),
        }
    }
}

fn is_recovery_password(key: &str) -> bool {
    let groups: Vec<&str> = key.split('-').collect();
    groups.len() == RECOVERY_GROUPS
        && groups
            .iter()
            .all(|g| g.len() == RECOVERY_GROUP_LEN && g.bytes().all(|b| b.is_ascii_digit()))
}

/// Decryption layer backed by the `dislocker` tools.
pub struct Dislocker<'a> {
    runner: &'a dyn Runner,
}

impl<'a> Dislocker<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Returns the decrypted virtual device exposed inside `fuse_dir`.
    pub fn virtual_device(fuse_dir: &Path) -> PathBuf {
        fuse_dir.join(constants::DISLOCKER_DEVICE)
    }

    /// Unlocks `partition` read-only into `fuse_dir` and returns the decrypted device.
    ///
    /// # Errors
    /// - `UnlockError::MissingKey` for an empty key
    /// - `UnlockError::Rejected` when the key does not open the volume
    /// - `UnlockError::Command` when `dislocker` fails for another reason
    pub fn unlock(&self, partition: &Path, key: &str, fuse_dir: &Path) -> Result<PathBuf, UnlockError> {
        let key = Key::parse(key).ok_or_else(|| UnlockError::MissingKey(partition.to_path_buf()))?;
        debug!("unlocking {} with a {}", partition.display(), match key {
            Key::Password(_) => "password",
            Key::Recovery(_) => "recovery password",
        });

        let dev = partition.to_string_lossy();
        let dir = fuse_dir.to_string_lossy();
        let key_arg = key.arg();
        let out = self.runner.run(
            constants::DISLOCKER,
            &["-r", "-V", dev.as_ref(), key_arg.as_str(), "--", dir.as_ref()],
        )?;

        if out.status != 0 {
            let diagnostic = out.diagnostic();
            if is_key_rejection(&diagnostic) {
                return Err(UnlockError::Rejected {
                    partition: partition.to_path_buf(),
                    diagnostic,
                });
            }
            return Err(UnlockError::Command(CommandError::Failed {
                program: constants::DISLOCKER.to_string(),
                status: out.status,
                diagnostic,
            }));
        }

        let device = Self::virtual_device(fuse_dir);
        if !device.exists() {
            return Err(UnlockError::NoDevice(device));
        }
        info!("unlocked {} into {}", partition.display(), fuse_dir.display());
        Ok(device)
    }

    /// Lists the key-protector identifiers of `partition` without unlocking it.
    pub fn key_protector_ids(&self, partition: &Path) -> Result<Vec<String>, CommandError> {
        let dev = partition.to_string_lossy();
        let out = self
            .runner
            .call(constants::DISLOCKER_METADATA, &["-V", dev.as_ref()])?;
        Ok(parse_guids(&out))
    }
}

fn is_key_rejection(diagnostic: &str) -> bool {
    let lower = diagnostic.to_ascii_lowercase();
    lower.contains("wrong")
        || lower.contains("invalid")
        || lower.contains("unable to grab vmk")
        || lower.contains("can't decrypt")
        || lower.contains("cannot decrypt")
}

/// Collects the GUIDs printed on lines mentioning one, in output order, without repeats.
fn parse_guids(out: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in out.lines().filter(|line| line.contains("GUID")) {
        for token in line.split(|c: char| !(c.is_ascii_hexdigit() || c == '-')) {
            if is_guid(token) && !ids.iter().any(|id| id.eq_ignore_ascii_case(token)) {
                ids.push(token.to_string());
            }
        }
    }
    ids
}

/// Matches the 8-4-4-4-12 hex layout.
fn is_guid(token: &str) -> bool {
    const LAYOUT: [usize; 5] = [8, 4, 4, 4, 12];
    let groups: Vec<&str> = token.split('-').collect();
    groups.len() == LAYOUT.len()
        && groups
            .iter()
            .zip(LAYOUT)
            .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Output;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    struct Scripted {
        status: i32,
        stdout: &'static str,
        stderr: &'static str,
        create: Option<PathBuf>,
        calls: RefCell<Vec<String>>,
    }

    impl Runner for Scripted {
        fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            if let Some(device) = &self.create {
                fs::write(device, b"decrypted").unwrap();
            }
            Ok(Output {
                stdout: self.stdout.to_string(),
                stderr: self.stderr.to_string(),
                status: self.status,
            })
        }
    }

    fn scripted(status: i32, stdout: &'static str, stderr: &'static str) -> Scripted {
        Scripted {
            status,
            stdout,
            stderr,
            create: None,
            calls: RefCell::new(vec![]),
        }
    }

    #[test]
    fn keys_are_classified() {
        assert_eq!(Key::parse(""), None);
        assert_eq!(Key::parse("hunter2"), Some(Key::Password("hunter2")));
        let rp = "123456-234567-345678-456789-567890-678901-789012-890123";
        assert_eq!(Key::parse(rp), Some(Key::Recovery(rp)));
        assert_eq!(
            Key::parse("123456-234567"),
            Some(Key::Password("123456-234567"))
        );
    }

    #[test]
    fn unlock_passes_key_and_returns_virtual_device() {
        let tmp = tempdir().unwrap();
        let fuse = tmp.path().join("p2-fuse");
        fs::create_dir_all(&fuse).unwrap();
        let runner = Scripted {
            create: Some(fuse.join("dislocker-file")),
            ..scripted(0, "", "")
        };

        let device = Dislocker::new(&runner)
            .unlock(Path::new("/dev/nbd0p2"), "secret", &fuse)
            .unwrap();
        assert_eq!(device, fuse.join("dislocker-file"));
        assert_eq!(
            runner.calls.borrow()[0],
            format!("dislocker -r -V /dev/nbd0p2 -usecret -- {}", fuse.display())
        );
    }

    #[test]
    fn unlock_without_key_never_runs_the_tool() {
        let runner = scripted(0, "", "");
        let err = Dislocker::new(&runner)
            .unlock(Path::new("/dev/nbd0p2"), "", Path::new("/mnt/p2-fuse"))
            .unwrap_err();
        assert!(matches!(err, UnlockError::MissingKey(_)));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let runner = scripted(1, "", "[CRITICAL] Unable to grab VMK or FVEK. Abort.");
        let err = Dislocker::new(&runner)
            .unlock(Path::new("/dev/nbd0p2"), "nope", Path::new("/mnt/p2-fuse"))
            .unwrap_err();
        assert!(matches!(err, UnlockError::Rejected { .. }));
    }

    #[test]
    fn key_protector_ids_are_deduplicated() {
        let runner = scripted(
            0,
            "[INFO] Recovery Key GUID: '4A1B2C3D-1111-2222-3333-444455556666'\n\
             [INFO] Datum value type: 8\n\
             [INFO] Key protector GUID: {4a1b2c3d-1111-2222-3333-444455556666}\n\
             [INFO] Password GUID: 'ABCDEF01-2345-6789-ABCD-EF0123456789'\n",
            "",
        );
        let ids = Dislocker::new(&runner)
            .key_protector_ids(Path::new("/dev/nbd0p2"))
            .unwrap();
        assert_eq!(
            ids,
            vec![
                "4A1B2C3D-1111-2222-3333-444455556666".to_string(),
                "ABCDEF01-2345-6789-ABCD-EF0123456789".to_string(),
            ]
        );
    }
}

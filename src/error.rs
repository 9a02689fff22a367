//! Error taxonomy of the public operations.

use std::io;
use std::path::PathBuf;
use thiserror;

use crate::decrypt::UnlockError;
use crate::device::AttachError;
use crate::fmount::TeardownFailure;
use crate::partition::DiskError;
use crate::relation::RelationError;
use crate::system::CommandError;

/// Represents errors returned by mount, unmount, key identification, extraction and verification.
#[derive(thiserror::Error, Debug)]
pub enum FmountError {
    #[error("Attach failed: {0}")]
    Attach(AttachError),
    #[error("Kernel module `{module}` could not be loaded: {source}")]
    ModuleLoad {
        module: String,
        source: CommandError,
    },
    #[error("Cannot classify {}: {source}", .partition.display())]
    Classification {
        partition: PathBuf,
        source: DiskError,
    },
    #[error("Unlock failed: {0}")]
    Unlock(UnlockError),
    #[error("Cannot mount {}: {source}", .target.display())]
    Mount {
        target: PathBuf,
        source: CommandError,
    },
    #[error("Relation bookkeeping failed: {0}")]
    Relation(RelationError),
    /// One or more teardown steps failed; their relations were kept.
    #[error("Teardown incomplete: {} step(s) failed", .0.len())]
    Teardown(Vec<TeardownFailure>),
    #[error("Cannot read {} for verification: {source}", .path.display())]
    VerifyIo { path: PathBuf, source: io::Error },
    #[error("Destination {} already exists", .0.display())]
    ExtractConflict(PathBuf),
    #[error("Archive {} holds {entries} files, expected one", .archive.display())]
    ExtractAmbiguous { archive: PathBuf, entries: usize },
    #[error("Archive {} holds no file", .0.display())]
    ExtractEmpty(PathBuf),
    #[error("Cannot read archive {}: {source}", .archive.display())]
    Archive {
        archive: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

pub type FmountResult<T> = Result<T, FmountError>;

impl FmountError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> FmountError {
        let path = path.into();
        move |source| FmountError::Io { path, source }
    }

    /// Returns whether the error marks an encrypted partition left locked for lack of a key.
    pub fn is_locked(&self) -> bool {
        matches!(self, FmountError::Unlock(UnlockError::MissingKey(_)))
    }
}

/// Lifts module load failures out of the attach error.
impl From<AttachError> for FmountError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::ModuleLoad { module, source } => FmountError::ModuleLoad { module, source },
            other => FmountError::Attach(other),
        }
    }
}

impl From<UnlockError> for FmountError {
    fn from(err: UnlockError) -> Self {
        FmountError::Unlock(err)
    }
}

impl From<RelationError> for FmountError {
    fn from(err: RelationError) -> Self {
        FmountError::Relation(err)
    }
}

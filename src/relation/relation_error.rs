//! Error types for the relation tree.

use std::io;
use std::path::PathBuf;
use thiserror;

/// Represents errors that can occur while reading or writing relations.
#[derive(thiserror::Error, Debug)]
pub enum RelationError {
    /// A relation entry could not be created, read or removed.
    #[error("Relation entry {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    /// Another image with the same file name already owns the subtree.
    #[error("Relations for `{name}` belong to {}, not {}", .existing.display(), .image.display())]
    Collision {
        name: String,
        existing: PathBuf,
        image: PathBuf,
    },
}

impl RelationError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> RelationError {
        let path = path.into();
        move |source| RelationError::Io { path, source }
    }
}

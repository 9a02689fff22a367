//! Relation tree made of directories and symbolic links.
//!
//! ```text
//! {root}/{image name}/image                  -> image
//! {root}/{image name}/devices/{device}       -> device
//! {root}/{image name}/decrypted/{partition}  -> decrypted virtual device
//! {root}/{image name}/mount-root             -> mount root
//! ```

use log::debug;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use super::relation_error::RelationError;
use super::{Relation, RelationStore};
use crate::utils;

const IMAGE_LINK: &str = "image";
const DEVICES_DIR: &str = "devices";
const DECRYPTED_DIR: &str = "decrypted";
const MOUNT_ROOT_LINK: &str = "mount-root";

/// Filesystem-backed relation store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct SymlinkTracker {
    root: PathBuf,
}

impl SymlinkTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn image_dir(&self, image: &Path) -> PathBuf {
        self.root.join(utils::base_name(image))
    }

    /// Returns the subtree of `image`, or `None` when nothing is recorded for it.
    ///
    /// # Errors
    /// `RelationError::Collision` if the subtree belongs to another image of the same name.
    fn owned_dir(&self, image: &Path) -> Result<Option<PathBuf>, RelationError> {
        let dir = self.image_dir(image);
        let link = dir.join(IMAGE_LINK);
        match fs::read_link(&link) {
            Ok(existing) if existing == image => Ok(Some(dir)),
            Ok(existing) => Err(RelationError::Collision {
                name: utils::base_name(image),
                existing,
                image: image.to_path_buf(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RelationError::io(link)(err)),
        }
    }

    fn entry_path(dir: &Path, relation: &Relation) -> PathBuf {
        match relation {
            Relation::Device(device) => dir.join(DEVICES_DIR).join(utils::base_name(device)),
            Relation::Decryption { partition, .. } => dir.join(DECRYPTED_DIR).join(partition),
            Relation::MountRoot(_) => dir.join(MOUNT_ROOT_LINK),
        }
    }
}

/// Points `link` at `target`, replacing a link to anything else.
fn replace_link(link: &Path, target: &Path) -> Result<(), RelationError> {
    match fs::read_link(link) {
        Ok(existing) if existing == target => return Ok(()),
        Ok(_) => fs::remove_file(link).map_err(RelationError::io(link))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(RelationError::io(link)(err)),
    }
    symlink(target, link).map_err(RelationError::io(link))
}

/// Reads every link in `dir` as `(name, target)`, sorted by name.
fn read_links(dir: &Path) -> Result<Vec<(String, PathBuf)>, RelationError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(RelationError::io(dir)(err)),
    };

    let mut links = vec![];
    for entry in entries {
        let path = entry.map_err(RelationError::io(dir))?.path();
        let target = fs::read_link(&path).map_err(RelationError::io(&path))?;
        links.push((utils::base_name(&path), target));
    }
    links.sort();
    Ok(links)
}

impl RelationStore for SymlinkTracker {
    fn link(&self, image: &Path, relation: &Relation) -> Result<(), RelationError> {
        let dir = match self.owned_dir(image)? {
            Some(dir) => dir,
            None => {
                let dir = self.image_dir(image);
                fs::create_dir_all(&dir).map_err(RelationError::io(&dir))?;
                replace_link(&dir.join(IMAGE_LINK), image)?;
                dir
            }
        };

        let entry = Self::entry_path(&dir, relation);
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent).map_err(RelationError::io(parent))?;
        }
        replace_link(&entry, relation.target())?;
        debug!("linked {} -> {}", entry.display(), relation.target().display());
        Ok(())
    }

    fn lookup(&self, image: &Path) -> Result<Vec<Relation>, RelationError> {
        let Some(dir) = self.owned_dir(image)? else {
            return Ok(vec![]);
        };

        let mut relations: Vec<Relation> = read_links(&dir.join(DEVICES_DIR))?
            .into_iter()
            .map(|(_, device)| Relation::Device(device))
            .collect();
        relations.extend(
            read_links(&dir.join(DECRYPTED_DIR))?
                .into_iter()
                .map(|(partition, fuse_device)| Relation::Decryption {
                    partition,
                    fuse_device,
                }),
        );

        let mount_root = dir.join(MOUNT_ROOT_LINK);
        match fs::read_link(&mount_root) {
            Ok(root) => relations.push(Relation::MountRoot(root)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(RelationError::io(mount_root)(err)),
        }
        Ok(relations)
    }

    fn reverse_lookup(&self, target: &Path) -> Result<Option<PathBuf>, RelationError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RelationError::io(&self.root)(err)),
        };

        for entry in entries {
            let dir = entry.map_err(RelationError::io(&self.root))?.path();
            let Ok(image) = fs::read_link(dir.join(IMAGE_LINK)) else {
                continue;
            };
            if self
                .lookup(&image)?
                .iter()
                .any(|relation| relation.target() == target)
            {
                return Ok(Some(image));
            }
        }
        Ok(None)
    }

    fn forget(&self, image: &Path, relation: &Relation) -> Result<(), RelationError> {
        let Some(dir) = self.owned_dir(image)? else {
            return Ok(());
        };

        let entry = Self::entry_path(&dir, relation);
        match fs::remove_file(&entry) {
            Ok(()) => debug!("forgot {}", entry.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(RelationError::io(entry)(err)),
        }

        // Drop the devices/decrypted directory once its last entry is gone.
        if let Some(parent) = entry.parent().filter(|parent| *parent != dir) {
            let empty = fs::read_dir(parent)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                utils::remove_empty_dir(parent).map_err(RelationError::io(parent))?;
            }
        }
        Ok(())
    }

    fn unlink(&self, image: &Path) -> Result<(), RelationError> {
        self.owned_dir(image)?;
        let dir = self.image_dir(image);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("unlinked {}", dir.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RelationError::io(dir)(err)),
        }
    }
}

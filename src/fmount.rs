//! Mount orchestration.
//!
//! A mount attaches the image, records the device, then walks the partitions
//! in table order: filter, classify, unlock when encrypted, mount read-only.
//! A partition that fails is reported and skipped. Unmount rebuilds the whole
//! picture from the relation store and the classifier, so it never needs the
//! process that mounted.

pub mod report;

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub use report::{KeyIdReport, MountReport, PartitionFailure, TeardownFailure, TeardownReport};

use crate::config::Config;
use crate::constants;
use crate::decrypt::{Dislocker, UnlockError};
use crate::device::{AttachError, Attacher, PartitionDevice};
use crate::error::{FmountError, FmountResult};
use crate::partition::Classifier;
use crate::relation::{Relation, RelationStore};
use crate::system::{Mounter, Runner};
use crate::traits::{ErrorSink, LogSink, ProgressSink};
use crate::utils;

/// Drives attach, classification, decryption and mounting, and their reverse.
pub struct Fmount<'a> {
    runner: &'a dyn Runner,
    store: &'a dyn RelationStore,
    config: &'a Config,
    progress: Option<&'a dyn ProgressSink>,
    errors: &'a dyn ErrorSink,
}

impl<'a> Fmount<'a> {
    /// Creates an orchestrator reporting per-partition failures to the log.
    pub fn new(runner: &'a dyn Runner, store: &'a dyn RelationStore, config: &'a Config) -> Self {
        Self {
            runner,
            store,
            config,
            progress: None,
            errors: &LogSink,
        }
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_errors(mut self, sink: &'a dyn ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    fn attacher(&self) -> Attacher<'a> {
        Attacher::new(self.runner, self.config)
    }

    fn classifier(&self) -> Classifier<'a> {
        Classifier::new(self.runner, self.config.sector_size())
    }

    fn mounter(&self) -> Mounter<'a> {
        Mounter::new(self.runner, self.config.mount_table())
    }

    /// Mounts every partition of `image` read-only under `mount_root`.
    ///
    /// # Parameters
    /// - `image`: Path to the disk image.
    /// - `mount_root`: Directory receiving one `p{N}` mount point per partition.
    /// - `key`: Password or recovery password for encrypted partitions; may be empty.
    /// - `bootable_only`: Skip partitions the table does not mark bootable.
    /// - `extra_args`: Extra arguments for the attach tool.
    ///
    /// # Returns
    /// A report whose mount points may be empty. Mount points sit under the
    /// canonical form of `mount_root`. Per-partition failures are listed in it
    /// and sent to the error sink.
    ///
    /// # Errors
    /// Only setup failures: module load, attach, bookkeeping, or partition
    /// listing. The device is released again before returning.
    pub fn mount(
        &self,
        image: &Path,
        mount_root: &Path,
        key: &str,
        bootable_only: bool,
        extra_args: &[String],
    ) -> FmountResult<MountReport> {
        let image = absolute(image)?;
        let mount_root = absolute(mount_root)?;
        let attacher = self.attacher();

        let device = attacher.resolve_slot()?;
        if let Err(err) = attacher.attach(&device, &image, extra_args) {
            if let AttachError::SlotBusy(_) = err {
                self.log_owner(&device);
            }
            return Err(err.into());
        }

        let created_root = !mount_root.exists();
        let (mount_root, partitions) = match self.prepare(&image, &device, &mount_root) {
            Ok(prepared) => prepared,
            Err(err) => {
                error!("setup of {} failed: {err}", image.display());
                self.rollback_setup(&image, &device, &mount_root, created_root);
                return Err(err);
            }
        };
        debug!("{} partition(s) on {}", partitions.len(), device.display());

        let classifier = self.classifier();
        let mut report = MountReport::new(device);
        for partition in &partitions {
            if bootable_only {
                match classifier.is_bootable(partition) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("skipping non-bootable {}", partition.node().display());
                        report.skipped.push(partition.node().clone());
                        continue;
                    }
                    Err(source) => {
                        let err = FmountError::Classification {
                            partition: partition.node().clone(),
                            source,
                        };
                        self.fail(&mut report.failures, partition, err);
                        continue;
                    }
                }
            }

            match self.mount_partition(&image, partition, &mount_root, key, &classifier) {
                Ok(target) => {
                    self.notify(&target.to_string_lossy());
                    report.mounted.push(target);
                }
                Err(err) => {
                    if err.is_locked() {
                        report.locked.push(partition.node().clone());
                    }
                    self.fail(&mut report.failures, partition, err);
                }
            }
        }

        info!(
            "{} of {} partition(s) of {} mounted",
            report.mounted.len(),
            partitions.len(),
            image.display()
        );
        Ok(report)
    }

    fn log_owner(&self, device: &Path) {
        match self.store.reverse_lookup(device) {
            Ok(Some(owner)) => warn!("{} is held by {}", device.display(), owner.display()),
            Ok(None) => debug!("{} is held by an image this tool did not attach", device.display()),
            Err(err) => debug!("cannot resolve the owner of {}: {err}", device.display()),
        }
    }

    /// Records the attach and lists the partitions to process.
    ///
    /// The mount root is resolved to the path the kernel reports in the mount
    /// table, so teardown finds every mount made below it.
    fn prepare(
        &self,
        image: &Path,
        device: &Path,
        mount_root: &Path,
    ) -> FmountResult<(PathBuf, Vec<PartitionDevice>)> {
        self.store.link(image, &Relation::Device(device.to_path_buf()))?;
        fs::create_dir_all(mount_root).map_err(FmountError::io(mount_root))?;
        let mount_root = fs::canonicalize(mount_root).map_err(FmountError::io(mount_root))?;
        self.store
            .link(image, &Relation::MountRoot(mount_root.clone()))?;
        let partitions = self
            .attacher()
            .partition_devices(device)
            .map_err(AttachError::from)?;
        Ok((mount_root, partitions))
    }

    fn rollback_setup(&self, image: &Path, device: &Path, mount_root: &Path, created_root: bool) {
        if let Err(err) = self.attacher().detach(device) {
            warn!("rollback: {err}");
        }
        if let Err(err) = self.store.unlink(image) {
            warn!("rollback: {err}");
        }
        if created_root {
            discard_dir(mount_root);
        }
    }

    fn mount_partition(
        &self,
        image: &Path,
        partition: &PartitionDevice,
        mount_root: &Path,
        key: &str,
        classifier: &Classifier,
    ) -> FmountResult<PathBuf> {
        let node = partition.node();
        let encrypted = classifier
            .is_encrypted(partition)
            .map_err(|source| FmountError::Classification {
                partition: node.clone(),
                source,
            })?;
        if encrypted && key.is_empty() {
            return Err(UnlockError::MissingKey(node.clone()).into());
        }

        let target = mount_root.join(format!("p{}", partition.index()));
        fs::create_dir_all(&target).map_err(FmountError::io(&target))?;

        let mounted = if encrypted {
            self.mount_decrypted(image, partition, &target, key)
        } else {
            self.mounter()
                .mount(node, &target, false)
                .map_err(|source| FmountError::Mount {
                    target: target.clone(),
                    source,
                })
        };

        match mounted {
            Ok(()) => {
                info!("mounted {} on {}", node.display(), target.display());
                Ok(target)
            }
            Err(err) => {
                discard_dir(&target);
                Err(err)
            }
        }
    }

    /// Unlocks `partition` into `p{N}-fuse` and loop-mounts the decrypted device on `target`.
    fn mount_decrypted(
        &self,
        image: &Path,
        partition: &PartitionDevice,
        target: &Path,
        key: &str,
    ) -> FmountResult<()> {
        let fuse_dir = fuse_dir_for(target);
        fs::create_dir_all(&fuse_dir).map_err(FmountError::io(&fuse_dir))?;

        let fuse_device = match Dislocker::new(self.runner).unlock(partition.node(), key, &fuse_dir) {
            Ok(device) => device,
            Err(err) => {
                self.release_fuse(&fuse_dir);
                return Err(err.into());
            }
        };

        let relation = Relation::Decryption {
            partition: utils::base_name(partition.node()),
            fuse_device: fuse_device.clone(),
        };
        let mounted = self
            .store
            .link(image, &relation)
            .map_err(FmountError::from)
            .and_then(|()| {
                self.mounter()
                    .mount(&fuse_device, target, true)
                    .map_err(|source| FmountError::Mount {
                        target: target.to_path_buf(),
                        source,
                    })
            });

        if mounted.is_err() {
            if let Err(err) = self.store.forget(image, &relation) {
                warn!("rollback: {err}");
            }
            self.release_fuse(&fuse_dir);
        }
        mounted
    }

    fn release_fuse(&self, fuse_dir: &Path) {
        if let Err(err) = self.mounter().unmount_dir(fuse_dir) {
            warn!("cannot release {}: {err}", fuse_dir.display());
        }
        discard_dir(fuse_dir);
    }

    /// Tears down everything recorded for `image`.
    ///
    /// Every step is attempted even after an earlier one failed. Relations of
    /// resources that could not be released are kept so a later call can retry;
    /// calling this on an image with nothing recorded changes nothing.
    ///
    /// # Errors
    /// Only when the recorded relations cannot be read. Failed steps are
    /// listed in the report; use [`TeardownReport::into_result`] to treat them as an error.
    pub fn unmount(&self, image: &Path) -> FmountResult<TeardownReport> {
        let image = absolute(image)?;
        let relations = self.store.lookup(&image)?;
        let mut report = TeardownReport::default();
        if relations.is_empty() {
            debug!("nothing recorded for {}", image.display());
            return Ok(report);
        }

        let mut devices = vec![];
        let mut decryptions = vec![];
        let mut prune = vec![];
        for relation in relations {
            match relation {
                Relation::Device(device) => devices.push(device),
                Relation::Decryption {
                    partition,
                    fuse_device,
                } => decryptions.push((partition, fuse_device)),
                Relation::MountRoot(root) => prune.push(root),
            }
        }

        let attacher = self.attacher();
        let classifier = self.classifier();
        for device in &devices {
            if attacher.is_attached(device) {
                match classifier.active_mounts(device) {
                    Ok(mounts) => prune.extend(
                        mounts
                            .iter()
                            .filter(|mount| utils::is_partition_dir(&utils::base_name(mount)))
                            .filter_map(|mount| mount.parent())
                            .map(Path::to_path_buf),
                    ),
                    Err(err) => self.step_failed(&mut report, device, AttachError::from(err).into()),
                }

                match attacher.partition_devices(device) {
                    Ok(partitions) => {
                        for partition in &partitions {
                            self.teardown_partition(&image, partition, &mut decryptions, &classifier, &mut report);
                        }
                    }
                    Err(err) => self.step_failed(&mut report, device, AttachError::from(err).into()),
                }
            }

            match attacher.detach(device) {
                Ok(()) => {
                    report.detached.push(device.clone());
                    self.forget(&image, &Relation::Device(device.clone()), &mut report);
                }
                Err(err) => self.step_failed(&mut report, device, err.into()),
            }
        }

        // Decryption mounts whose partition is gone with its device.
        for (partition, fuse_device) in decryptions {
            self.teardown_decryption(&image, partition, fuse_device, &mut report);
        }

        if report.is_clean() {
            if let Err(err) = self.store.unlink(&image) {
                self.step_failed(&mut report, &image, err.into());
            }
        } else {
            warn!(
                "{} teardown step(s) failed, keeping relations of {}",
                report.failures.len(),
                image.display()
            );
        }

        prune.sort();
        prune.dedup();
        for root in &prune {
            if let Err(err) = utils::prune_mount_root(root) {
                self.step_failed(&mut report, root, FmountError::io(root)(err));
            }
        }
        Ok(report)
    }

    fn teardown_partition(
        &self,
        image: &Path,
        partition: &PartitionDevice,
        decryptions: &mut Vec<(String, PathBuf)>,
        classifier: &Classifier,
        report: &mut TeardownReport,
    ) {
        let name = utils::base_name(partition.node());
        if let Some(pos) = decryptions.iter().position(|(recorded, _)| *recorded == name) {
            let (name, fuse_device) = decryptions.remove(pos);
            self.teardown_decryption(image, name, fuse_device, report);
            return;
        }

        match classifier.is_encrypted(partition) {
            Ok(true) => debug!("{} was never unlocked", partition.node().display()),
            Ok(false) => self.unmount_step(partition.node(), true, report),
            Err(source) => {
                let err = FmountError::Classification {
                    partition: partition.node().clone(),
                    source,
                };
                self.step_failed(report, partition.node(), err);
                self.unmount_step(partition.node(), true, report);
            }
        }
    }

    /// Unmounts the inner mount, then the decryption mount, then forgets the relation.
    fn teardown_decryption(&self, image: &Path, partition: String, fuse_device: PathBuf, report: &mut TeardownReport) {
        let failures = report.failures.len();
        if let Some(fuse_dir) = fuse_device.parent() {
            if let Some(mount_dir) = mount_dir_for(fuse_dir) {
                self.unmount_step(&mount_dir, false, report);
            }
            self.unmount_step(fuse_dir, false, report);
        }

        if report.failures.len() == failures {
            let relation = Relation::Decryption {
                partition,
                fuse_device,
            };
            self.forget(image, &relation, report);
        }
    }

    /// Unmounts a directory, or every mount of a device when `device` is set.
    fn unmount_step(&self, target: &Path, device: bool, report: &mut TeardownReport) {
        let mounter = self.mounter();
        let result = if device {
            mounter.unmount_dev(target)
        } else {
            mounter.unmount_dir(target)
        };

        match result {
            Ok(true) => {
                info!("unmounted {}", target.display());
                report.unmounted.push(target.to_path_buf());
            }
            Ok(false) => {}
            Err(source) => {
                let err = FmountError::Mount {
                    target: target.to_path_buf(),
                    source,
                };
                self.step_failed(report, target, err);
            }
        }
    }

    fn forget(&self, image: &Path, relation: &Relation, report: &mut TeardownReport) {
        if let Err(err) = self.store.forget(image, relation) {
            self.step_failed(report, relation.target(), err.into());
        }
    }

    fn step_failed(&self, report: &mut TeardownReport, target: &Path, err: FmountError) {
        self.errors.report(&err);
        report.failures.push(TeardownFailure::new(target, err));
    }

    /// Lists the key-protector identifiers of every encrypted partition of `image`.
    ///
    /// The image is attached only for the duration of the call and nothing is mounted.
    pub fn key_ids(&self, image: &Path, extra_args: &[String]) -> FmountResult<KeyIdReport> {
        let image = absolute(image)?;
        let attacher = self.attacher();
        let device = attacher.resolve_slot()?;
        attacher.attach(&device, &image, extra_args)?;

        let collected = self.collect_key_ids(&device);
        let detached = attacher.detach(&device);
        if let (Err(_), Err(err)) = (&collected, &detached) {
            error!("{err}");
        }
        let report = collected?;
        detached?;
        Ok(report)
    }

    fn collect_key_ids(&self, device: &Path) -> FmountResult<KeyIdReport> {
        let partitions = self
            .attacher()
            .partition_devices(device)
            .map_err(AttachError::from)?;
        let classifier = self.classifier();
        let dislocker = Dislocker::new(self.runner);

        let mut report = KeyIdReport::default();
        for partition in &partitions {
            match classifier.is_encrypted(partition) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(source) => {
                    let err = FmountError::Classification {
                        partition: partition.node().clone(),
                        source,
                    };
                    self.fail(&mut report.failures, partition, err);
                    continue;
                }
            }

            match dislocker.key_protector_ids(partition.node()) {
                Ok(ids) => {
                    for id in ids {
                        if !report.ids.contains(&id) {
                            self.notify(&id);
                            report.ids.push(id);
                        }
                    }
                }
                Err(err) => self.fail(&mut report.failures, partition, UnlockError::from(err).into()),
            }
        }
        Ok(report)
    }

    /// Returns the relations recorded for `image`.
    pub fn status(&self, image: &Path) -> FmountResult<Vec<Relation>> {
        Ok(self.store.lookup(&absolute(image)?)?)
    }

    /// Returns the block devices recorded for `image`.
    pub fn block_devices(&self, image: &Path) -> FmountResult<Vec<PathBuf>> {
        Ok(self
            .status(image)?
            .into_iter()
            .filter_map(|relation| match relation {
                Relation::Device(device) => Some(device),
                _ => None,
            })
            .collect())
    }

    fn fail(&self, failures: &mut Vec<PartitionFailure>, partition: &PartitionDevice, err: FmountError) {
        self.errors.report(&err);
        failures.push(PartitionFailure::new(partition, err));
    }

    fn notify(&self, item: &str) {
        if let Some(sink) = self.progress {
            if let Err(err) = sink.progress(item) {
                warn!("progress sink failed: {err}");
            }
        }
    }
}

fn absolute(path: &Path) -> FmountResult<PathBuf> {
    std::path::absolute(path).map_err(FmountError::io(path))
}

/// `{mountRoot}/p{N}` becomes `{mountRoot}/p{N}-fuse`.
fn fuse_dir_for(target: &Path) -> PathBuf {
    let mut dir = target.as_os_str().to_os_string();
    dir.push(constants::FUSE_SUFFIX);
    PathBuf::from(dir)
}

fn mount_dir_for(fuse_dir: &Path) -> Option<PathBuf> {
    utils::base_name(fuse_dir)
        .strip_suffix(constants::FUSE_SUFFIX)
        .map(|name| fuse_dir.with_file_name(name))
}

fn discard_dir(dir: &Path) {
    if let Err(err) = utils::remove_empty_dir(dir) {
        debug!("keeping {}: {err}", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_dir_pairs_with_mount_dir() {
        let fuse = fuse_dir_for(Path::new("/mnt/case/p2"));
        assert_eq!(fuse, PathBuf::from("/mnt/case/p2-fuse"));
        assert_eq!(mount_dir_for(&fuse), Some(PathBuf::from("/mnt/case/p2")));
        assert_eq!(mount_dir_for(Path::new("/mnt/case/p2")), None);
    }
}

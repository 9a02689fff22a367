//! Binding disk images to network block devices through `qemu-nbd`.

use log::{debug, info};
use std::path::{Path, PathBuf};

use super::PartitionDevice;
use super::attach_error::AttachError;
use crate::config::{Config, Slot};
use crate::constants;
use crate::system::{CommandError, ModuleLoader, Runner};
use crate::utils;

/// Attaches images to block device slots and lists their partitions.
pub struct Attacher<'a> {
    runner: &'a dyn Runner,
    config: &'a Config,
}

impl<'a> Attacher<'a> {
    pub fn new(runner: &'a dyn Runner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    /// Returns whether an image is currently bound to `device`.
    pub fn is_attached(&self, device: &Path) -> bool {
        self.config.sys_block(device).join("pid").exists()
    }

    /// Resolves the configured slot to a device node.
    pub fn resolve_slot(&self) -> Result<PathBuf, AttachError> {
        match self.config.slot() {
            Slot::Fixed(path) => Ok(path.clone()),
            Slot::Auto => self.free_slot(),
        }
    }

    /// Returns the first existing `nbdN` node with no image bound.
    pub fn free_slot(&self) -> Result<PathBuf, AttachError> {
        (0..self.config.max_slots())
            .map(|n| self.config.dev_node(&format!("nbd{n}")))
            .find(|node| node.exists() && !self.is_attached(node))
            .ok_or(AttachError::NoFreeSlot(self.config.max_slots()))
    }

    /// Loads the kernel module and binds `image` read-only to `slot`.
    ///
    /// # Errors
    /// - `AttachError::ModuleLoad` if the module cannot be loaded
    /// - `AttachError::SlotBusy` if an image is already bound to `slot`
    /// - `AttachError::Command` if `qemu-nbd` is missing or fails
    pub fn attach(&self, slot: &Path, image: &Path, extra_args: &[String]) -> Result<(), AttachError> {
        let params: Vec<&str> = self.config.module_params().iter().map(String::as_str).collect();
        ModuleLoader::new(self.runner)
            .ensure(self.config.module(), &params)
            .map_err(|source| AttachError::ModuleLoad {
                module: self.config.module().clone(),
                source,
            })?;

        if self.is_attached(slot) {
            return Err(AttachError::SlotBusy(slot.to_path_buf()));
        }

        let slot_arg = slot.to_string_lossy();
        let image_arg = image.to_string_lossy();
        let mut args = vec!["-r", "-c", slot_arg.as_ref()];
        args.extend(extra_args.iter().map(String::as_str));
        args.push(image_arg.as_ref());

        self.runner.call(constants::QEMU_NBD, &args)?;
        info!("attached {} to {}", image.display(), slot.display());
        Ok(())
    }

    /// Releases the image bound to `device`; an unbound device is left alone.
    pub fn detach(&self, device: &Path) -> Result<(), AttachError> {
        if !self.is_attached(device) {
            debug!("{} is not attached", device.display());
            return Ok(());
        }

        let dev = device.to_string_lossy();
        self.runner.call(constants::QEMU_NBD, &["-d", dev.as_ref()])?;
        info!("detached {}", device.display());
        Ok(())
    }

    /// Lists the partitions of `device` in table order.
    pub fn partition_devices(&self, device: &Path) -> Result<Vec<PartitionDevice>, CommandError> {
        let dev = device.to_string_lossy();
        let out = self
            .runner
            .call(constants::LSBLK, &["-l", "-n", "-o", "NAME", dev.as_ref()])?;
        Ok(parse_partitions(&out, device, self.config))
    }
}

/// Turns `lsblk` names into partition devices, dropping the row of the device itself.
fn parse_partitions(out: &str, device: &Path, config: &Config) -> Vec<PartitionDevice> {
    let device_name = utils::base_name(device);

    out.lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != device_name)
        .enumerate()
        .map(|(i, name)| {
            let index = i + 1;
            let number = name
                .strip_prefix(device_name.as_str())
                .and_then(utils::trailing_number)
                .unwrap_or(index);
            PartitionDevice::new(config.dev_node(name), device, index, number)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Output;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl Runner for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            let stdout = match program {
                "lsmod" => "Module Size Used by\nnbd 1 0\n".to_string(),
                "lsblk" => "nbd0\nnbd0p1\nnbd0p2\nnbd0p5\n".to_string(),
                _ => String::new(),
            };
            Ok(Output {
                stdout,
                ..Output::default()
            })
        }
    }

    #[test]
    fn attach_runs_qemu_nbd_read_only() {
        let tmp = tempdir().unwrap();
        let config = Config::default().with_sys_root(tmp.path());
        let runner = Recorder::default();
        Attacher::new(&runner, &config)
            .attach(
                Path::new("/dev/nbd0"),
                Path::new("/cases/disk.E01"),
                &["-f".to_string(), "raw".to_string()],
            )
            .unwrap();
        assert_eq!(
            runner.calls.borrow().last().unwrap(),
            "qemu-nbd -r -c /dev/nbd0 -f raw /cases/disk.E01"
        );
    }

    #[test]
    fn attach_refuses_busy_slot() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("block/nbd0")).unwrap();
        fs::write(tmp.path().join("block/nbd0/pid"), "42\n").unwrap();
        let config = Config::default().with_sys_root(tmp.path());
        let runner = Recorder::default();

        let err = Attacher::new(&runner, &config)
            .attach(Path::new("/dev/nbd0"), Path::new("/cases/disk.dd"), &[])
            .unwrap_err();
        assert!(matches!(err, AttachError::SlotBusy(_)));
        assert!(!runner.calls.borrow().iter().any(|c| c.starts_with("qemu-nbd")));
    }

    #[test]
    fn detach_of_unbound_device_is_a_no_op() {
        let tmp = tempdir().unwrap();
        let config = Config::default().with_sys_root(tmp.path());
        let runner = Recorder::default();
        Attacher::new(&runner, &config)
            .detach(Path::new("/dev/nbd0"))
            .unwrap();
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn partitions_are_listed_in_table_order() {
        let config = Config::default().with_dev_root("/tmp/dev");
        let runner = Recorder::default();
        let parts = Attacher::new(&runner, &config)
            .partition_devices(Path::new("/tmp/dev/nbd0"))
            .unwrap();

        let summary: Vec<_> = parts
            .iter()
            .map(|p| (p.node().clone(), p.index(), p.number()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (PathBuf::from("/tmp/dev/nbd0p1"), 1, 1),
                (PathBuf::from("/tmp/dev/nbd0p2"), 2, 2),
                (PathBuf::from("/tmp/dev/nbd0p5"), 3, 5),
            ]
        );
        assert!(parts.iter().all(|p| p.parent() == Path::new("/tmp/dev/nbd0")));
    }

    #[test]
    fn free_slot_skips_bound_devices() {
        let tmp = tempdir().unwrap();
        let dev = tmp.path().join("dev");
        fs::create_dir_all(&dev).unwrap();
        for n in 0..3 {
            fs::write(dev.join(format!("nbd{n}")), b"").unwrap();
        }
        fs::create_dir_all(tmp.path().join("sys/block/nbd0")).unwrap();
        fs::write(tmp.path().join("sys/block/nbd0/pid"), "1").unwrap();

        let config = Config::default()
            .with_dev_root(&dev)
            .with_sys_root(tmp.path().join("sys"))
            .with_slot(Slot::Auto)
            .with_max_slots(3);
        let runner = Recorder::default();
        assert_eq!(
            Attacher::new(&runner, &config).resolve_slot().unwrap(),
            dev.join("nbd1")
        );
    }
}

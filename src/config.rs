//! Runtime configuration.
//!
//! Every host path the pipeline touches is configurable so that the same
//! code runs against a scratch directory in tests.

use getset::{CopyGetters, Getters};
use std::convert::Infallible;
use std::env;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants;

/// Attach slot selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Always attach to this device node.
    Fixed(PathBuf),
    /// Attach to the first unbound `/dev/nbdN`.
    Auto,
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Fixed(PathBuf::from(constants::DEFAULT_SLOT))
    }
}

impl FromStr for Slot {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(Slot::Auto),
            path => Ok(Slot::Fixed(PathBuf::from(path))),
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Fixed(path) => write!(f, "{}", path.display()),
            Slot::Auto => write!(f, "auto"),
        }
    }
}

/// Configuration shared by every operation.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Config {
    #[get = "pub"]
    slot: Slot,
    /// Root directory of the relation tree.
    #[get = "pub"]
    relation_root: PathBuf,
    /// Directory partition device nodes are resolved in.
    #[get = "pub"]
    dev_root: PathBuf,
    #[get = "pub"]
    sys_root: PathBuf,
    /// Mount table consulted before unmounting.
    #[get = "pub"]
    mount_table: PathBuf,
    /// Kernel module providing the attach slots.
    #[get = "pub"]
    module: String,
    #[get = "pub"]
    module_params: Vec<String>,
    /// Upper bound for a single external tool invocation.
    #[get_copy = "pub"]
    timeout: Duration,
    /// Delay between asking an overrunning tool to stop and killing it.
    #[get_copy = "pub"]
    grace: Duration,
    #[get_copy = "pub"]
    sector_size: usize,
    #[get_copy = "pub"]
    max_slots: usize,
}

impl Default for Config {
    fn default() -> Self {
        let relation_root = env::var_os(constants::RELATION_ROOT_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_RELATION_ROOT));

        Self {
            slot: Slot::default(),
            relation_root,
            dev_root: PathBuf::from(constants::DEFAULT_DEV_ROOT),
            sys_root: PathBuf::from(constants::DEFAULT_SYS_ROOT),
            mount_table: PathBuf::from(constants::DEFAULT_MOUNT_TABLE),
            module: constants::NBD_MODULE.to_string(),
            module_params: vec![constants::NBD_MODULE_PARAMS.to_string()],
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            grace: Duration::from_secs(constants::DEFAULT_GRACE_SECS),
            sector_size: constants::SECTOR_SIZE,
            max_slots: constants::MAX_SLOTS,
        }
    }
}

impl Config {
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_relation_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.relation_root = root.into();
        self
    }

    pub fn with_dev_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dev_root = root.into();
        self
    }

    pub fn with_sys_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sys_root = root.into();
        self
    }

    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    pub fn with_module(mut self, module: impl Into<String>, params: Vec<String>) -> Self {
        self.module = module.into();
        self.module_params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_sector_size(mut self, sector_size: usize) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Returns the device node `name` resolves to under the device root.
    pub fn dev_node(&self, name: &str) -> PathBuf {
        self.dev_root.join(name)
    }

    /// Returns the sysfs directory describing block device `dev`.
    pub fn sys_block(&self, dev: &Path) -> PathBuf {
        self.sys_root
            .join("block")
            .join(dev.file_name().unwrap_or(dev.as_os_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_parses_auto_and_paths() {
        assert_eq!("auto".parse::<Slot>().unwrap(), Slot::Auto);
        assert_eq!(
            "/dev/nbd3".parse::<Slot>().unwrap(),
            Slot::Fixed(PathBuf::from("/dev/nbd3"))
        );
        assert_eq!(Slot::default().to_string(), "/dev/nbd0");
    }

    #[test]
    fn sys_block_uses_device_name() {
        let config = Config::default().with_sys_root("/tmp/sys");
        assert_eq!(
            config.sys_block(Path::new("/dev/nbd1")),
            PathBuf::from("/tmp/sys/block/nbd1")
        );
    }
}

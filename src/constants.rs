/// The size of a sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// The attach slot used when none is configured.
pub const DEFAULT_SLOT: &str = "/dev/nbd0";

/// Root directory of the relation tree.
pub const DEFAULT_RELATION_ROOT: &str = "/run/fmount";

/// Environment variable overriding the relation root.
pub const RELATION_ROOT_ENV: &str = "FMOUNT_RELATIONS";

/// Base directory for mount roots derived from the image name.
pub const DEFAULT_MOUNT_BASE: &str = "/mnt";

pub const DEFAULT_DEV_ROOT: &str = "/dev";
pub const DEFAULT_SYS_ROOT: &str = "/sys";
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

/// Kernel module providing network block devices.
pub const NBD_MODULE: &str = "nbd";

/// Parameter passed to the module so partitions get their own device nodes.
pub const NBD_MODULE_PARAMS: &str = "max_part=16";

/// Upper bound of `/dev/nbdN` slots probed by the free-slot allocator.
pub const MAX_SLOTS: usize = 16;

/// Default timeout of a single external tool invocation, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Delay between SIGTERM and SIGKILL when a tool overruns, in seconds.
pub const DEFAULT_GRACE_SECS: u64 = 5;

/// Name of the decrypted virtual device exposed inside a decryption mount.
pub const DISLOCKER_DEVICE: &str = "dislocker-file";

/// Suffix of the intermediate decryption mount point.
pub const FUSE_SUFFIX: &str = "-fuse";

pub const QEMU_NBD: &str = "qemu-nbd";
pub const LSBLK: &str = "lsblk";
pub const LSMOD: &str = "lsmod";
pub const MODPROBE: &str = "modprobe";
pub const MOUNT: &str = "mount";
pub const UMOUNT: &str = "umount";
pub const DISLOCKER: &str = "dislocker";
pub const DISLOCKER_METADATA: &str = "dislocker-metadata";

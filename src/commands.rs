//! Command line definition of the `fmount` tool.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::checksum::Algorithm;
use crate::config::Slot;
use crate::constants;

/// Mount forensic disk images read-only and tear the mounts down again.
#[derive(Debug, Parser)]
#[command(name = "fmount", version)]
pub struct Cli {
    /// Attach slot: a device node, or `auto` for the first free one.
    #[arg(long, global = true, default_value = constants::DEFAULT_SLOT)]
    pub slot: Slot,

    /// Root directory of the relation tree.
    #[arg(long, global = true, env = constants::RELATION_ROOT_ENV, default_value = constants::DEFAULT_RELATION_ROOT)]
    pub relations: PathBuf,

    /// Seconds an external tool may run before it is stopped.
    #[arg(long, global = true, default_value_t = constants::DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Increase logging verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Silence all logging.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Represents a subcommand of the tool.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mount every partition of an image under a mount root.
    Mount(MountArgs),
    /// Unmount and detach everything recorded for an image.
    Unmount {
        image: PathBuf,
    },
    /// List the key-protector ids of the encrypted partitions of an image.
    Keys {
        image: PathBuf,
        /// Extra arguments passed to the attach tool.
        #[arg(last = true)]
        attach_args: Vec<String>,
    },
    /// Extract the image contained in a single-file archive.
    Extract {
        archive: PathBuf,
    },
    /// Compare the digest of an image with an expected value.
    Verify {
        image: PathBuf,
        #[arg(value_enum)]
        algorithm: Algorithm,
        digest: String,
    },
    /// Show the relations recorded for an image.
    Status {
        image: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct MountArgs {
    pub image: PathBuf,

    /// Directory receiving the `p{N}` mount points; defaults to `/mnt/<image stem>`.
    pub mount_root: Option<PathBuf>,

    /// Password or recovery password for encrypted partitions.
    #[arg(short, long, env = "FMOUNT_KEY", hide_env_values = true, default_value = "")]
    pub key: String,

    /// Only mount partitions marked bootable.
    #[arg(short, long)]
    pub bootable: bool,

    /// Verify the image first.
    #[arg(long, value_name = "ALGO:HEX")]
    pub verify: Option<Checksum>,

    /// Treat the image as a single-file archive and extract it first.
    #[arg(long)]
    pub extract: bool,

    /// Extra arguments passed to the attach tool.
    #[arg(last = true)]
    pub attach_args: Vec<String>,
}

impl MountArgs {
    /// Returns the mount root for `image`, which may differ from the argument after extraction.
    pub fn mount_root_for(&self, image: &Path) -> PathBuf {
        self.mount_root.clone().unwrap_or_else(|| {
            let stem = image.file_stem().unwrap_or(image.as_os_str());
            Path::new(constants::DEFAULT_MOUNT_BASE).join(stem)
        })
    }
}

/// An expected digest given as `algo:hex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: Algorithm,
    pub digest: String,
}

impl FromStr for Checksum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected ALGO:HEX, got `{s}`"))?;
        let algorithm = algorithm.parse::<Algorithm>().map_err(|err| err.to_string())?;
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("`{digest}` is not a hex digest"));
        }
        Ok(Checksum {
            algorithm,
            digest: digest.to_string(),
        })
    }
}

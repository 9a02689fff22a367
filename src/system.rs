//! External collaborators: subprocess execution, kernel modules and mounts.
//!
//! Everything that shells out to the host lives below this module so the
//! rest of the crate can be driven by a scripted [`Runner`] in tests.

pub mod command;
pub mod command_error;
pub mod module;
pub mod mounts;

pub use command::{CancelFlag, CommandRunner, Output, Runner};
pub use command_error::CommandError;
pub use module::ModuleLoader;
pub use mounts::Mounter;

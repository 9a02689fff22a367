//! Decryption of encrypted partitions through a FUSE-based decryptor.

pub mod dislocker;
pub mod unlock_error;

pub use dislocker::{Dislocker, Key};
pub use unlock_error::UnlockError;

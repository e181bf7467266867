//! veilfs-core: shared types for the veilfs workspace
//!
//! Holds the error enum every other crate returns, the mount configuration
//! handed over by the external config/key loader, and the master-key type.

pub mod config;
pub mod error;

pub use config::{flags, MasterKey, MountOptions, FORMAT_VERSION, KEY_SIZE, MASTER_KEY_SIZE};
pub use error::{VeilError, VeilResult};

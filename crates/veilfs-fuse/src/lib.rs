//! veilfs-fuse: the filesystem façade.
//!
//! Maps POSIX-style operations on logical (plaintext) paths to host
//! operations on the encrypted backing directory. The [`ops::Mount`] type
//! is the FUSE-style callback surface: every method returns zero or a
//! negative errno, and each worker thread gets its own lazily constructed
//! [`fs::FileSystem`] so key schedules and directory handles are never
//! shared mutable state.

pub mod attr;
pub mod file;
pub mod fs;
pub mod ops;
pub mod path;

pub use attr::{FileStat, StatVfs, TimeSpec};
pub use file::File;
pub use fs::{DirEntry, FileSystem};
pub use ops::Mount;

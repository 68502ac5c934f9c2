//! FUSE frontend for the shell-command filesystem.
//!
//! Mounts a scanned source tree read-only and serves command-backed
//! files as live process output. The index side lives in
//! `shellfs-core`; this crate adapts it to the kernel protocol.

pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;

pub use config::MountConfig;
pub use error::{FsError, FsResult};
pub use filesystem::ShellFs;

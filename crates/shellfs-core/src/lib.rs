//! Entry discovery and index assembly for shellfs.
//!
//! shellfs projects a real directory tree into an alternate view:
//! ordinary directories and files pass through, while any directory name
//! wrapped in a sentinel marker (`#name#`) appears as a single regular
//! file `name` whose content is the live stdout of the `cmd` executable
//! inside it.
//!
//! This crate is the protocol-agnostic half of that projection:
//!
//! - [`entry`] — the shared entry vocabulary (kinds, identity, sizes).
//! - The tree walker — one depth-first pass classifying every node and
//!   skipping descent into command-file directories.
//! - The size resolver — per-entry concurrent size computation with a
//!   `size`-probe fast path and an execute-and-count fallback.
//! - [`index`] — the single-writer assembler, the published [`Snapshot`],
//!   and the per-generation stability signal.
//!
//! The FUSE-facing layer lives in `shellfs-fuse` and consumes only the
//! [`Catalog`] handed out by an [`Indexer`].
//!
//! # Usage
//!
//! ```ignore
//! let indexer = Indexer::new(ScanConfig::default());
//! let ticket = indexer.scan(&source).await?;
//! let catalog = indexer.catalog();   // serve from this
//! ticket.stable().await;             // all sizes real from here on
//! ```

pub mod entry;
pub mod error;
pub mod index;
mod resolve;
mod walk;

pub use entry::{Entry, EntryKind, DEFAULT_MARKER, DIR_SIZE, PROVISIONAL_SIZE};
pub use error::{ScanError, ScanResult};
pub use index::{Catalog, Indexer, ScanConfig, ScanTicket, Snapshot, ROOT_INODE};
pub use resolve::{COMMAND_NAME, SIZE_PROBE_NAME};

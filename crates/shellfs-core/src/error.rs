//! Error types for scanning and index assembly.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`Indexer::scan`](crate::Indexer::scan).
///
/// Per-node traversal failures are logged and skipped rather than
/// surfaced; only the failures below abort a scan. A failed scan leaves
/// the previously published generation serving.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan root itself could not be read. Fatal to this scan only.
    #[error("failed to read scan root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The assembler task is gone; no further scans are possible.
    #[error("index assembler has shut down")]
    AssemblerClosed,
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

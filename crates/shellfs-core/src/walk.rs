//! Single-pass tree walker.
//!
//! Walks the source tree depth-first and emits exactly one [`Discovered`]
//! record per visited node into the assembler's input channel, in
//! traversal order. Sentinel-wrapped directories are classified as
//! command files and never descended into: their contents (the `cmd`
//! executable and optional `size` script) are implementation detail of
//! the projection, not entries.

use crate::entry::{is_command_name, strip_marker, EntryKind};
use crate::error::{ScanError, ScanResult};
use crate::index::IndexMsg;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A classified node emitted by the walker, before identity assignment.
#[derive(Debug)]
pub(crate) struct Discovered {
    pub kind: EntryKind,
    /// Externally visible name (markers already stripped).
    pub name: String,
    /// Externally visible parent directory path.
    pub parent: PathBuf,
    /// Real location in the source tree.
    pub backing: PathBuf,
}

/// Walks `root` and feeds the assembler. Returns the number of entries
/// emitted.
///
/// A failure to read `root` itself aborts the scan; the root is read
/// before anything is emitted, so an aborted scan emits no entries.
/// Failures on individual nodes below the root are logged and skipped.
pub(crate) async fn walk(
    root: PathBuf,
    marker: char,
    tx: mpsc::Sender<IndexMsg>,
) -> ScanResult<u64> {
    let mut pending = vec![root.clone()];
    let mut emitted = 0u64;
    let mut at_root = true;

    while let Some(dir) = pending.pop() {
        let mut children = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(source) if at_root => {
                return Err(ScanError::Root { path: dir, source });
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        at_root = false;

        loop {
            let child = match children.next_entry().await {
                Ok(Some(child)) => child,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "directory iteration failed, rest skipped");
                    break;
                }
            };

            let file_type = match child.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    warn!(path = %child.path().display(), error = %e, "skipping node without readable type");
                    continue;
                }
            };

            let Ok(raw_name) = child.file_name().into_string() else {
                warn!(path = %child.path().display(), "skipping non-UTF-8 name");
                continue;
            };

            let backing = child.path();
            let (kind, name) = if file_type.is_dir() && is_command_name(&raw_name, marker) {
                (EntryKind::CommandFile, strip_marker(&raw_name, marker).to_string())
            } else if file_type.is_dir() {
                (EntryKind::Directory, raw_name)
            } else {
                (EntryKind::ReadOnlyFile, raw_name)
            };

            trace!(parent = %dir.display(), name = %name, ?kind, "discovered");

            if kind == EntryKind::Directory {
                pending.push(backing.clone());
            }

            let discovered = Discovered {
                kind,
                name,
                parent: dir.clone(),
                backing,
            };
            if tx.send(IndexMsg::Discovered(discovered)).await.is_err() {
                return Err(ScanError::AssemblerClosed);
            }
            emitted += 1;
        }
    }

    Ok(emitted)
}

//! Per-entry size resolution.
//!
//! One resolution runs per discovered entry, concurrently, immediately on
//! discovery. Directories are fixed at [`DIR_SIZE`] and never reach this
//! module; pass-through files are sized from source metadata; command
//! files first ask the backing directory's `size` probe and fall back to
//! executing `cmd` and counting its output bytes.
//!
//! Every path through here produces a size, defaulting to 0 on failure,
//! so the assembler's completion counting stays exact.

use crate::entry::{EntryKind, DIR_SIZE};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executable a backing directory must contain; its stdout is the
/// command file's content.
pub const COMMAND_NAME: &str = "cmd";

/// Optional executable that prints the expected byte length of `cmd`'s
/// output as a single unsigned integer.
pub const SIZE_PROBE_NAME: &str = "size";

/// Resolves the exposed byte length for one entry. Infallible by design:
/// failures are logged and resolve to 0.
pub(crate) async fn resolve(kind: EntryKind, backing: &Path) -> u64 {
    match kind {
        EntryKind::Directory => DIR_SIZE,
        EntryKind::ReadOnlyFile => match tokio::fs::metadata(backing).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %backing.display(), error = %e, "source file metadata unavailable, size set to 0");
                0
            }
        },
        EntryKind::CommandFile => command_file_size(backing).await,
    }
}

/// Sizes a command file: fast `size` probe first, execute-and-count
/// fallback second.
async fn command_file_size(backing: &Path) -> u64 {
    match probe_size(backing).await {
        Some(size) => size,
        None => measure_output(backing).await,
    }
}

/// Runs the `size` probe with no arguments and parses its trimmed stdout
/// as an unsigned integer. Returns `None` if the probe is absent, exits
/// non-zero, or prints something unparseable.
async fn probe_size(backing: &Path) -> Option<u64> {
    let probe = format!("./{SIZE_PROBE_NAME}");
    let output = match Command::new(&probe)
        .current_dir(backing)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!(path = %backing.display(), error = %e, "size probe not runnable, falling back");
            return None;
        }
    };

    if !output.status.success() {
        debug!(path = %backing.display(), status = %output.status, "size probe failed, falling back");
        return None;
    }

    // Trailing newlines are expected from shell probes.
    let text = String::from_utf8_lossy(&output.stdout);
    match text.trim().parse::<u64>() {
        Ok(size) => Some(size),
        Err(e) => {
            debug!(path = %backing.display(), output = %text.trim(), error = %e,
                "size probe output did not parse, falling back");
            None
        }
    }
}

/// Runs `cmd` to completion and counts the bytes it writes to stdout.
///
/// Known limitation: the count from this throwaway run is cached as the
/// entry's advertised size, which assumes the command's output length is
/// stable across invocations.
async fn measure_output(backing: &Path) -> u64 {
    let command = format!("./{COMMAND_NAME}");
    let mut child = match Command::new(&command)
        .current_dir(backing)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(path = %backing.display(), error = %e, "command not runnable, size set to 0");
            return 0;
        }
    };

    let Some(mut stdout) = child.stdout.take() else {
        warn!(path = %backing.display(), "command spawned without stdout pipe, size set to 0");
        return 0;
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => total += n as u64,
            Err(e) => {
                warn!(path = %backing.display(), error = %e, "command output read failed, size set to 0");
                let _ = child.wait().await;
                return 0;
            }
        }
    }

    // Reap the child; its exit status does not affect the measured size.
    if let Err(e) = child.wait().await {
        debug!(path = %backing.display(), error = %e, "command wait failed after measuring output");
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_probe_size_parses_trimmed_output() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), SIZE_PROBE_NAME, "echo '  42  '");
        assert_eq!(probe_size(dir.path()).await, Some(42));
    }

    #[tokio::test]
    async fn test_probe_size_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_size(dir.path()).await, None);
    }

    #[tokio::test]
    async fn test_probe_size_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), SIZE_PROBE_NAME, "echo 42; exit 1");
        assert_eq!(probe_size(dir.path()).await, None);
    }

    #[tokio::test]
    async fn test_probe_size_garbage_output() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), SIZE_PROBE_NAME, "echo not-a-number");
        assert_eq!(probe_size(dir.path()).await, None);
    }

    #[tokio::test]
    async fn test_measure_output_counts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), COMMAND_NAME, "printf hello");
        assert_eq!(measure_output(dir.path()).await, 5);
    }

    #[tokio::test]
    async fn test_measure_output_unrunnable_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(measure_output(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_command_file_prefers_probe() {
        let dir = tempfile::tempdir().unwrap();
        // Probe reports a size that disagrees with the actual output;
        // the probe wins because the fallback never runs.
        write_script(dir.path(), SIZE_PROBE_NAME, "echo 99");
        write_script(dir.path(), COMMAND_NAME, "printf hi");
        assert_eq!(command_file_size(dir.path()).await, 99);
    }

    #[tokio::test]
    async fn test_resolve_readonly_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        assert_eq!(resolve(EntryKind::ReadOnlyFile, &path).await, 10);
    }

    #[tokio::test]
    async fn test_resolve_vanished_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        assert_eq!(resolve(EntryKind::ReadOnlyFile, &path).await, 0);
    }
}

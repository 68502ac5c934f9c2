//! Stream-level tests for command and pass-through handles, driven by a
//! scanned catalog but without a kernel mount.

use shellfs_core::{EntryKind, Indexer, ScanConfig};
use shellfs_fuse::handles::{CommandStream, HandleTable, ShellHandle, SourceFile};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "{body}").unwrap();
    drop(f);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_command_entry_streams_fresh_output_per_open() {
    let root = tempfile::tempdir().unwrap();
    let backing = root.path().join("#counter#");
    std::fs::create_dir_all(&backing).unwrap();
    let state = root.path().join("state");
    // Output changes every run.
    write_script(
        &backing,
        "cmd",
        &format!(
            "n=$(cat {state} 2>/dev/null || echo 0); n=$((n + 1)); echo $n > {state}; echo run-$n",
            state = state.display()
        ),
    );

    let indexer = Indexer::new(ScanConfig::default());
    indexer.scan(root.path()).await.unwrap().stable().await;

    let snapshot = indexer.catalog().current();
    let entry = snapshot.lookup(root.path(), "counter").unwrap();
    assert_eq!(entry.kind, EntryKind::CommandFile);

    let mut first = CommandStream::spawn(&entry.backing).unwrap();
    let data = first.read_chunk(64).unwrap();
    assert_eq!(data, b"run-1\n");
    first.terminate();

    let mut second = CommandStream::spawn(&entry.backing).unwrap();
    let data = second.read_chunk(64).unwrap();
    assert_eq!(data, b"run-2\n");
    second.terminate();
}

#[tokio::test]
async fn test_sequential_chunks_then_short_read_at_eof() {
    let root = tempfile::tempdir().unwrap();
    let backing = root.path().join("#abc#");
    std::fs::create_dir_all(&backing).unwrap();
    write_script(&backing, "cmd", "printf abcdefgh");

    let indexer = Indexer::new(ScanConfig::default());
    indexer.scan(root.path()).await.unwrap().stable().await;

    let snapshot = indexer.catalog().current();
    let entry = snapshot.lookup(root.path(), "abc").unwrap();
    assert_eq!(entry.size(), 8);

    let mut stream = CommandStream::spawn(&entry.backing).unwrap();
    assert_eq!(stream.read_chunk(3).unwrap(), b"abc");
    assert_eq!(stream.read_chunk(3).unwrap(), b"def");
    // Last chunk comes back short, then empty.
    assert_eq!(stream.read_chunk(3).unwrap(), b"gh");
    assert!(stream.read_chunk(3).unwrap().is_empty());
    stream.terminate();
}

#[tokio::test]
async fn test_passthrough_reads_backing_file() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("notes.txt"), b"plain contents").unwrap();

    let indexer = Indexer::new(ScanConfig::default());
    indexer.scan(root.path()).await.unwrap().stable().await;

    let snapshot = indexer.catalog().current();
    let entry = snapshot.lookup(root.path(), "notes.txt").unwrap();
    assert_eq!(entry.kind, EntryKind::ReadOnlyFile);
    assert_eq!(entry.size(), 14);

    let mut file = SourceFile::open(&entry.backing).unwrap();
    assert_eq!(file.read_chunk(5).unwrap(), b"plain");
    assert_eq!(file.read_chunk(64).unwrap(), b" contents");
    assert!(file.read_chunk(64).unwrap().is_empty());
    file.close().unwrap();
}

#[tokio::test]
async fn test_handle_table_tracks_concurrent_opens() {
    let root = tempfile::tempdir().unwrap();
    let backing = root.path().join("#hi#");
    std::fs::create_dir_all(&backing).unwrap();
    write_script(&backing, "cmd", "echo hi");

    let indexer = Indexer::new(ScanConfig::default());
    indexer.scan(root.path()).await.unwrap().stable().await;

    let snapshot = indexer.catalog().current();
    let entry = snapshot.lookup(root.path(), "hi").unwrap();

    let table = HandleTable::new();
    let a = table.insert(ShellHandle::Command(
        CommandStream::spawn(&entry.backing).unwrap(),
    ));
    let b = table.insert(ShellHandle::Command(
        CommandStream::spawn(&entry.backing).unwrap(),
    ));
    assert_ne!(a, b);
    assert_eq!(table.len(), 2);

    // Each handle owns an independent stream.
    for fh in [a, b] {
        let mut handle = table.get_mut(fh).unwrap();
        let ShellHandle::Command(stream) = &mut *handle else {
            panic!("expected command handle");
        };
        assert_eq!(stream.read_chunk(64).unwrap(), b"hi\n");
    }

    for fh in [a, b] {
        if let Some(ShellHandle::Command(mut stream)) = table.remove(fh) {
            stream.terminate();
        }
    }
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_command_stderr_is_not_part_of_content() {
    let root = tempfile::tempdir().unwrap();
    let backing = root.path().join("#noisy#");
    std::fs::create_dir_all(&backing).unwrap();
    write_script(&backing, "cmd", "echo warning >&2; printf ok");

    let indexer = Indexer::new(ScanConfig::default());
    indexer.scan(root.path()).await.unwrap().stable().await;

    let snapshot = indexer.catalog().current();
    let entry = snapshot.lookup(root.path(), "noisy").unwrap();
    assert_eq!(entry.size(), 2);

    let mut stream = CommandStream::spawn(&entry.backing).unwrap();
    assert_eq!(stream.read_chunk(64).unwrap(), b"ok");
    stream.terminate();
}

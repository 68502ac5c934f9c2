//! The entry model: every object the virtual filesystem exposes.
//!
//! An [`Entry`] is one node in the projected tree. Plain directories and
//! plain files pass through from the source tree; a directory whose name
//! is wrapped in the sentinel marker (`#name#` by default) is projected
//! as a single regular file named `name`, backed by the output of the
//! `cmd` executable inside that directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// The sentinel character wrapping command-file directory names.
pub const DEFAULT_MARKER: char = '#';

/// Size reported for directories. Never resolved asynchronously.
pub const DIR_SIZE: u64 = 4096;

/// Placeholder size for entries whose true length is not yet known.
///
/// Deliberately the maximum representable value: the serving protocol
/// signals end-of-stream with a short read, so the advertised size must
/// never be smaller than the actual content length.
pub const PROVISIONAL_SIZE: u64 = u64::MAX;

/// Classification of an entry. Closed set: any new kind must be handled
/// at every dispatch point that matches over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A pass-through directory from the source tree.
    Directory,
    /// A virtual file whose content is the stdout of `cmd` inside the
    /// sentinel-wrapped backing directory.
    CommandFile,
    /// A pass-through read-only file from the source tree.
    ReadOnlyFile,
}

impl EntryKind {
    /// Returns true for the kinds exposed as regular files.
    pub fn is_file(self) -> bool {
        matches!(self, EntryKind::CommandFile | EntryKind::ReadOnlyFile)
    }
}

/// One filesystem object as exposed to clients.
///
/// Entries are immutable after discovery except for `size`, which starts
/// at [`PROVISIONAL_SIZE`] (or [`DIR_SIZE`] for directories) and is
/// overwritten exactly once when its resolution reports.
#[derive(Debug)]
pub struct Entry {
    /// Process-lifetime-unique identity, assigned at discovery. Also the
    /// FUSE inode number; never reused while its generation is live.
    pub ino: u64,
    pub kind: EntryKind,
    /// Externally visible name (sentinel markers stripped for command files).
    pub name: String,
    /// Externally visible path of the containing directory.
    pub parent: PathBuf,
    /// Real location in the source tree. For command files this is the
    /// sentinel-wrapped directory, which is never exposed as an entry.
    pub backing: PathBuf,
    size: AtomicU64,
}

impl Entry {
    pub(crate) fn new(
        ino: u64,
        kind: EntryKind,
        name: String,
        parent: PathBuf,
        backing: PathBuf,
    ) -> Self {
        let size = match kind {
            EntryKind::Directory => DIR_SIZE,
            EntryKind::CommandFile | EntryKind::ReadOnlyFile => PROVISIONAL_SIZE,
        };
        Self {
            ino,
            kind,
            name,
            parent,
            backing,
            size: AtomicU64::new(size),
        }
    }

    /// The externally visible full path of this entry.
    pub fn path(&self) -> PathBuf {
        self.parent.join(&self.name)
    }

    /// Byte length exposed to clients. [`PROVISIONAL_SIZE`] until the
    /// entry's resolution reports.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Whether the exposed size is still the provisional placeholder.
    pub fn size_resolved(&self) -> bool {
        self.kind == EntryKind::Directory || self.size() != PROVISIONAL_SIZE
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }
}

/// Returns true if a directory name designates a command file: first and
/// last character are the marker and the name is at least two characters.
pub fn is_command_name(name: &str, marker: char) -> bool {
    let mut chars = name.chars();
    match (chars.next(), name.chars().next_back()) {
        (Some(first), Some(last)) => {
            first == marker && last == marker && name.chars().count() >= 2
        }
        _ => false,
    }
}

/// Strips the sentinel markers from a command-file directory name.
///
/// Callers must have checked [`is_command_name`] first.
pub fn strip_marker(name: &str, marker: char) -> &str {
    name.strip_prefix(marker)
        .and_then(|n| n.strip_suffix(marker))
        .unwrap_or(name)
}

/// Wraps an external name back into its sentinel-marked directory name.
pub fn wrap_marker(name: &str, marker: char) -> String {
    format!("{marker}{name}{marker}")
}

/// The backing directory for a command file with the given external
/// parent and name.
pub fn command_backing_path(parent: &Path, name: &str, marker: char) -> PathBuf {
    parent.join(wrap_marker(name, marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_matching() {
        assert!(is_command_name("#greet#", '#'));
        assert!(is_command_name("##", '#'));
        assert!(!is_command_name("#", '#'));
        assert!(!is_command_name("", '#'));
        assert!(!is_command_name("greet", '#'));
        assert!(!is_command_name("#greet", '#'));
        assert!(!is_command_name("greet#", '#'));
        assert!(is_command_name("%greet%", '%'));
        assert!(!is_command_name("#greet#", '%'));
    }

    #[test]
    fn test_strip_and_wrap_roundtrip() {
        assert_eq!(strip_marker("#greet#", '#'), "greet");
        assert_eq!(wrap_marker("greet", '#'), "#greet#");
        assert_eq!(strip_marker(&wrap_marker("du -sh", '#'), '#'), "du -sh");
    }

    #[test]
    fn test_stripped_name_never_contains_marker() {
        for name in ["#greet#", "#a#", "##"] {
            let stripped = strip_marker(name, '#');
            assert!(!stripped.starts_with('#'));
            assert!(!stripped.ends_with('#'));
        }
    }

    #[test]
    fn test_multibyte_marker_names() {
        // char-based matching must not panic on multibyte boundaries
        assert!(is_command_name("§greet§", '§'));
        assert_eq!(strip_marker("§greet§", '§'), "greet");
        assert!(!is_command_name("émojis_🎉.txt", '#'));
    }

    #[test]
    fn test_entry_size_lifecycle() {
        let dir = Entry::new(
            2,
            EntryKind::Directory,
            "a".into(),
            PathBuf::from("/src"),
            PathBuf::from("/src/a"),
        );
        assert_eq!(dir.size(), DIR_SIZE);
        assert!(dir.size_resolved());

        let cmd = Entry::new(
            3,
            EntryKind::CommandFile,
            "greet".into(),
            PathBuf::from("/src/a"),
            PathBuf::from("/src/a/#greet#"),
        );
        assert_eq!(cmd.size(), PROVISIONAL_SIZE);
        assert!(!cmd.size_resolved());
        cmd.set_size(6);
        assert_eq!(cmd.size(), 6);
        assert!(cmd.size_resolved());
    }

    #[test]
    fn test_entry_paths() {
        let e = Entry::new(
            4,
            EntryKind::CommandFile,
            "greet".into(),
            PathBuf::from("/src/a"),
            command_backing_path(Path::new("/src/a"), "greet", '#'),
        );
        assert_eq!(e.path(), PathBuf::from("/src/a/greet"));
        assert_eq!(e.backing, PathBuf::from("/src/a/#greet#"));
    }
}

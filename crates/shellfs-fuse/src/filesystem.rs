//! FUSE filesystem implementation over the published index snapshot.
//!
//! `ShellFs` is a stateless protocol adapter: every operation loads the
//! latest [`Snapshot`] from the shared [`Catalog`] and answers from it.
//! The only state below the snapshot boundary is per-handle session
//! state, exclusively owned by each open file.
//!
//! Two size models meet here. Directory and pass-through sizes are known
//! eagerly; command-file sizes are provisional (`u64::MAX`) until their
//! background resolution reports. The provisional value is deliberately
//! an upper bound: the kernel learns the true content length from the
//! first short read, and an attribute size smaller than the actual
//! content would truncate reads.

use crate::error::{io_error_to_errno, FsError, FsResult};
use crate::handles::{CommandStream, HandleTable, ShellHandle, SourceFile};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use libc::c_int;
use shellfs_core::{Catalog, Entry, EntryKind, Snapshot, DIR_SIZE, ROOT_INODE};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, trace};

/// Block size reported in attributes and statfs.
const BLOCK_SIZE: u32 = 4096;

/// Directory permissions (rwxr-xr-x).
const DIR_PERM: u16 = 0o755;

/// File permissions (r--r--r--): the projection is read-only.
const FILE_PERM: u16 = 0o444;

/// Attribute TTL. Short, because provisional sizes resolve in place and
/// whole generations can be swapped out by a rescan.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// FUSE filesystem serving a scanned source tree.
pub struct ShellFs {
    /// Read side of the index; holds the latest published generation.
    catalog: Arc<Catalog>,
    /// Source path the synthetic root is bound to.
    source: PathBuf,
    /// Open-file sessions.
    handles: HandleTable,
    /// Timestamp applied to all attributes (the projection has no
    /// meaningful per-entry times).
    started: SystemTime,
    uid: u32,
    gid: u32,
}

impl ShellFs {
    /// Creates a filesystem bound to `source`, serving whatever the
    /// catalog currently publishes.
    pub fn new(catalog: Arc<Catalog>, source: PathBuf) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        info!(source = %source.display(), uid, gid, "ShellFs initialized");
        Self {
            catalog,
            source,
            handles: HandleTable::new(),
            started: SystemTime::now(),
            uid,
            gid,
        }
    }

    fn make_attr(&self, ino: u64, kind: FileType, size: u64, perm: u16) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: self.started,
            mtime: self.started,
            ctime: self.started,
            crtime: self.started,
            kind,
            perm,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes for the synthetic root directory.
    fn root_attr(&self) -> FileAttr {
        self.make_attr(ROOT_INODE, FileType::Directory, DIR_SIZE, DIR_PERM)
    }

    /// Attributes for an indexed entry. The size is whatever the entry
    /// currently advertises, provisional or resolved.
    fn entry_attr(&self, entry: &Entry) -> FileAttr {
        match entry.kind {
            EntryKind::Directory => {
                self.make_attr(entry.ino, FileType::Directory, entry.size(), DIR_PERM)
            }
            EntryKind::CommandFile | EntryKind::ReadOnlyFile => {
                self.make_attr(entry.ino, FileType::RegularFile, entry.size(), FILE_PERM)
            }
        }
    }

    /// Coarse directory-entry type tag for listings.
    fn type_tag(kind: EntryKind) -> FileType {
        match kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::CommandFile | EntryKind::ReadOnlyFile => FileType::RegularFile,
        }
    }

    /// Resolves an inode to the externally visible directory path it
    /// names. Inode 1 is the source root.
    fn dir_path(&self, snapshot: &Snapshot, ino: u64) -> FsResult<PathBuf> {
        if ino == ROOT_INODE {
            return Ok(self.source.clone());
        }
        let entry = snapshot.entry(ino).ok_or(FsError::NotFound(ino))?;
        if entry.kind == EntryKind::Directory {
            Ok(entry.path())
        } else {
            Err(FsError::NotDirectory(ino))
        }
    }

    /// Inode of the directory containing `ino`, for `..` listings.
    fn parent_ino(&self, snapshot: &Snapshot, ino: u64) -> u64 {
        if ino == ROOT_INODE {
            return ROOT_INODE;
        }
        snapshot
            .entry(ino)
            .and_then(|entry| {
                if entry.parent == self.source {
                    Some(ROOT_INODE)
                } else {
                    snapshot.at(&entry.parent).map(|parent| parent.ino)
                }
            })
            .unwrap_or(ROOT_INODE)
    }
}

impl Filesystem for ShellFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(source = %self.source.display(), "FUSE session started");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE session ended");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        let snapshot = self.catalog.current();
        let dir = match self.dir_path(&snapshot, parent) {
            Ok(dir) => dir,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        match snapshot.lookup(&dir, name) {
            Some(entry) => reply.entry(&ATTR_TTL, &self.entry_attr(entry), 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        // Entries live as long as their snapshot; nothing to evict.
        trace!(ino, nlookup, "forget");
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");

        if ino == ROOT_INODE {
            reply.attr(&ATTR_TTL, &self.root_attr());
            return;
        }

        let snapshot = self.catalog.current();
        match snapshot.entry(ino) {
            Some(entry) => reply.attr(&ATTR_TTL, &self.entry_attr(entry)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        let snapshot = self.catalog.current();
        match self.dir_path(&snapshot, ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, offset, "readdir");

        let snapshot = self.catalog.current();
        let dir = match self.dir_path(&snapshot, ino) {
            Ok(dir) => dir,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let parent = self.parent_ino(&snapshot, ino);

        // Snapshots are immutable, so plain index offsets are stable
        // cookies for resumed listings.
        let mut listing: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];
        listing.extend(
            snapshot
                .children(&dir)
                .iter()
                .map(|e| (e.ino, Self::type_tag(e.kind), e.name.clone())),
        );

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        for (i, (entry_ino, kind, name)) in listing.into_iter().enumerate().skip(start) {
            let next = i64::try_from(i + 1).unwrap_or(i64::MAX);
            if reply.add(entry_ino, next, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(ino, "releasedir");
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");

        if (flags & libc::O_ACCMODE) != libc::O_RDONLY {
            reply.error(FsError::ReadOnly.to_errno());
            return;
        }

        let snapshot = self.catalog.current();
        let Some(entry) = snapshot.entry(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let handle = match entry.kind {
            EntryKind::Directory => {
                reply.error(FsError::IsDirectory(ino).to_errno());
                return;
            }
            EntryKind::CommandFile => match CommandStream::spawn(&entry.backing) {
                Ok(stream) => ShellHandle::Command(stream),
                Err(e) => {
                    error!(backing = %entry.backing.display(), error = %e, "command start failed");
                    reply.error(io_error_to_errno(&e));
                    return;
                }
            },
            EntryKind::ReadOnlyFile => match SourceFile::open(&entry.backing) {
                Ok(file) => ShellHandle::Passthrough(file),
                Err(e) => {
                    error!(backing = %entry.backing.display(), error = %e, "source open failed");
                    reply.error(io_error_to_errno(&e));
                    return;
                }
            },
        };

        let fh = self.handles.insert(handle);
        // Sequential-only: content is a stream, and the advertised size
        // may exceed the real length until the first short read.
        reply.opened(
            fh,
            fuser::consts::FOPEN_DIRECT_IO | fuser::consts::FOPEN_NONSEEKABLE,
        );
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        // Handles are non-seekable; the kernel sends sequential offsets,
        // which the stream position already tracks.
        trace!(ino, fh, offset, size, "read");

        let Some(mut handle) = self.handles.get_mut(fh) else {
            reply.error(FsError::BadHandle(fh).to_errno());
            return;
        };

        let result = match &mut *handle {
            ShellHandle::Command(stream) => stream.read_chunk(size as usize),
            ShellHandle::Passthrough(file) => file.read_chunk(size as usize),
        };
        drop(handle);

        match result {
            // Short or empty data is the end-of-stream signal.
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!(fh, error = %e, "stream read failed");
                reply.error(io_error_to_errno(&e));
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "release");

        match self.handles.remove(fh) {
            Some(ShellHandle::Command(mut stream)) => {
                stream.terminate();
                debug!(fh, "command handle released");
                reply.ok();
            }
            Some(ShellHandle::Passthrough(file)) => match file.close() {
                Ok(()) => reply.ok(),
                Err(e) => {
                    error!(fh, error = %e, "source close failed");
                    reply.error(io_error_to_errno(&e));
                }
            },
            None => reply.ok(),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let snapshot = self.catalog.current();
        let files = snapshot.len() as u64 + 1; // + synthetic root
        reply.statfs(0, 0, 0, files, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(ino, mask, "access");
        if (mask & libc::W_OK) != 0 {
            reply.error(FsError::ReadOnly.to_errno());
        } else {
            reply.ok();
        }
    }
}

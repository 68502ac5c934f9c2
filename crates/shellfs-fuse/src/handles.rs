//! Open-file session state.
//!
//! A handle is created on `open` and destroyed on `release`. For a
//! command file it owns the live child process whose stdout is the file
//! content; for a pass-through file it owns the real source file. Both
//! read strictly sequentially: the serving protocol marks every handle
//! non-seekable and signals end-of-stream with a short read.

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::IntoRawFd;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A live command invocation backing one open of a command file.
///
/// The child process is owned exclusively by this handle from spawn to
/// [`terminate`](Self::terminate); nothing else may reap it.
#[derive(Debug)]
pub struct CommandStream {
    child: Child,
    stdout: ChildStdout,
}

impl CommandStream {
    /// Spawns `cmd` inside the backing directory with a piped stdout.
    ///
    /// Blocks only long enough to start the process, not for any data.
    pub fn spawn(backing: &Path) -> io::Result<Self> {
        let mut child = Command::new(format!("./{}", shellfs_core::COMMAND_NAME))
            .current_dir(backing)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("spawned command has no stdout pipe"))?;
        debug!(backing = %backing.display(), pid = child.id(), "command spawned");
        Ok(Self { child, stdout })
    }

    /// Reads up to `len` bytes, blocking until they are available or the
    /// stream ends. A short (possibly empty) result is end-of-stream,
    /// never an error.
    pub fn read_chunk(&mut self, len: usize) -> io::Result<Vec<u8>> {
        read_full(&mut self.stdout, len)
    }

    /// Requests termination of the child without waiting for it.
    ///
    /// Best effort only: a child that ignores SIGTERM may linger until
    /// the daemon exits.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match i32::try_from(self.child.id()) {
                Ok(pid) if pid > 0 => {
                    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                        trace!(pid, error = %e, "SIGTERM delivery failed");
                    }
                }
                _ => {}
            }
        }
        // Reap immediately if it already exited; otherwise leave it.
        let _ = self.child.try_wait();
    }
}

/// An open pass-through file from the source tree.
#[derive(Debug)]
pub struct SourceFile {
    file: File,
}

impl SourceFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Sequential read with the same short-read EOF contract as
    /// [`CommandStream::read_chunk`].
    pub fn read_chunk(&mut self, len: usize) -> io::Result<Vec<u8>> {
        read_full(&mut self.file, len)
    }

    /// Closes the underlying file, surfacing the close result.
    pub fn close(self) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        if unsafe { libc::close(fd) } == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Session state behind one FUSE file handle.
#[derive(Debug)]
pub enum ShellHandle {
    Command(CommandStream),
    Passthrough(SourceFile),
}

/// Thread-safe table of open handles with auto-incrementing ids.
///
/// Ids start at 1; 0 is reserved for invalid.
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, ShellHandle>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a handle and returns its id.
    pub fn insert(&self, handle: ShellHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, handle);
        id
    }

    /// Exclusive access to a handle for reading its stream.
    pub fn get_mut(&self, fh: u64) -> Option<RefMut<'_, u64, ShellHandle>> {
        self.handles.get_mut(&fh)
    }

    /// Removes and returns a handle on release.
    pub fn remove(&self, fh: u64) -> Option<ShellHandle> {
        self.handles.remove(&fh).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads until `len` bytes are filled or the stream ends.
fn read_full(reader: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

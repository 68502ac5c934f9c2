//! Index assembly and snapshot publication.
//!
//! A single assembler task owns the live indices for the generation
//! being built. It consumes one multiplexed channel carrying walker
//! discoveries, the end-of-generation signal, and size-resolution
//! reports; serializing all index mutation through that task removes any
//! need for locking during construction.
//!
//! At end-of-generation the finished indices are frozen into a
//! [`Snapshot`] and atomically swapped into the [`Catalog`]. Readers only
//! ever see complete generations; entries still carrying the provisional
//! size are resolved in place afterwards (the size field is the one
//! atomically mutable part of a published entry). When every resolution
//! for a generation has reported, the generation is stable and the
//! stability signal fires exactly once.

use crate::entry::{Entry, EntryKind};
use crate::error::{ScanError, ScanResult};
use crate::resolve;
use crate::walk::{self, Discovered};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// The FUSE root inode. The scan root itself is never an [`Entry`]; the
/// serving layer binds inode 1 to the source path.
pub const ROOT_INODE: u64 = 1;

/// First identity handed out by the assembler.
const FIRST_INODE: u64 = 2;

/// Capacity of the assembler's multiplexed input channel.
const CHANNEL_CAPACITY: usize = 256;

/// Messages multiplexed into the assembler task.
pub(crate) enum IndexMsg {
    /// A node classified by the walker, in traversal order.
    Discovered(Discovered),
    /// The walker finished its traversal.
    ScanDone,
    /// A size resolution completed (exactly one per non-directory entry).
    Resolved { ino: u64, size: u64 },
}

/// Scan-time configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Character wrapping command-file directory names.
    pub marker: char,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            marker: crate::entry::DEFAULT_MARKER,
        }
    }
}

/// One complete, immutable generation of the projected tree.
///
/// Safe for concurrent readers: nothing is mutated after publication
/// except entry sizes, which resolve in place through an atomic.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    /// Children per externally visible directory path, in discovery order.
    children: HashMap<PathBuf, Vec<Arc<Entry>>>,
    /// Entry per externally visible full path.
    by_path: HashMap<PathBuf, Arc<Entry>>,
    /// Entry per identity.
    by_ino: HashMap<u64, Arc<Entry>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            children: HashMap::new(),
            by_path: HashMap::new(),
            by_ino: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Child entries directly beneath `dir`, in discovery order. Empty
    /// for paths with no recorded children, never an error.
    pub fn children(&self, dir: &Path) -> &[Arc<Entry>] {
        self.children.get(dir).map_or(&[], Vec::as_slice)
    }

    /// Resolves `parent/name` in the flat index.
    pub fn lookup(&self, parent: &Path, name: &str) -> Option<&Arc<Entry>> {
        self.by_path.get(&parent.join(name))
    }

    /// Looks up an entry by its externally visible full path.
    pub fn at(&self, path: &Path) -> Option<&Arc<Entry>> {
        self.by_path.get(path)
    }

    /// Looks up an entry by identity.
    pub fn entry(&self, ino: u64) -> Option<&Arc<Entry>> {
        self.by_ino.get(&ino)
    }

    /// Number of entries in this generation.
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

/// Read side of the index: the currently published [`Snapshot`].
///
/// Handed to the serving layer as an explicit owned value, never ambient
/// global state. Loads are lock-free; the assembler swaps in whole
/// generations atomically.
pub struct Catalog {
    snapshot: ArcSwap<Snapshot>,
}

impl Catalog {
    fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    /// The latest published generation. Before the first scan completes
    /// this is an empty generation-0 snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        self.snapshot.store(snapshot);
    }
}

/// Awaitable handle for one scan generation's stability signal.
///
/// Stability means every size resolution for the generation has
/// reported and no exposed size is provisional anymore.
#[derive(Debug)]
pub struct ScanTicket {
    generation: u64,
    stable: watch::Receiver<u64>,
}

impl ScanTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves once this generation reaches the stable state. Fires at
    /// most once per generation; awaiting after the fact returns
    /// immediately.
    pub async fn stable(mut self) {
        while *self.stable.borrow_and_update() < self.generation {
            if self.stable.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owner of the scan pipeline: spawns the assembler task and drives
/// walker generations through it.
pub struct Indexer {
    tx: mpsc::Sender<IndexMsg>,
    catalog: Arc<Catalog>,
    published: watch::Receiver<u64>,
    stable: watch::Receiver<u64>,
    /// Last generation successfully started; held across a whole scan to
    /// serialize generations.
    scan_lock: Mutex<u64>,
    marker: char,
}

impl Indexer {
    /// Creates the indexer and spawns its assembler task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ScanConfig) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (published_tx, published) = watch::channel(0);
        let (stable_tx, stable) = watch::channel(0);
        let catalog = Arc::new(Catalog::new());

        tokio::spawn(assemble(
            rx,
            tx.clone(),
            Arc::clone(&catalog),
            published_tx,
            stable_tx,
        ));

        Self {
            tx,
            catalog,
            published,
            stable,
            scan_lock: Mutex::new(0),
            marker: config.marker,
        }
    }

    /// The shared read side consumed by the serving layer.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Runs one full scan generation over `root`.
    ///
    /// Returns once the generation's snapshot is published (entries not
    /// yet resolved still carry provisional sizes); the returned
    /// [`ScanTicket`] awaits full resolution. A new generation never
    /// begins before the prior one is stable, which keeps identity
    /// assignment monotonic and free of aliasing.
    ///
    /// On a root-level error nothing is published and the previously
    /// published generation keeps serving.
    pub async fn scan(&self, root: &Path) -> ScanResult<ScanTicket> {
        let mut last = self.scan_lock.lock().await;

        if *last > 0 {
            let mut stable = self.stable.clone();
            while *stable.borrow_and_update() < *last {
                stable
                    .changed()
                    .await
                    .map_err(|_| ScanError::AssemblerClosed)?;
            }
        }
        let generation = *last + 1;

        info!(root = %root.display(), generation, "scan started");
        let walker = tokio::spawn(walk::walk(
            root.to_path_buf(),
            self.marker,
            self.tx.clone(),
        ));
        let emitted = walker.await.map_err(|_| ScanError::AssemblerClosed)??;

        self.tx
            .send(IndexMsg::ScanDone)
            .await
            .map_err(|_| ScanError::AssemblerClosed)?;

        let mut published = self.published.clone();
        while *published.borrow_and_update() < generation {
            published
                .changed()
                .await
                .map_err(|_| ScanError::AssemblerClosed)?;
        }

        info!(generation, entries = emitted, "scan published");
        *last = generation;
        Ok(ScanTicket {
            generation,
            stable: self.stable.clone(),
        })
    }
}

/// Live state for the generation currently being built or drained.
#[derive(Default)]
struct Building {
    children: HashMap<PathBuf, Vec<Arc<Entry>>>,
    by_path: HashMap<PathBuf, Arc<Entry>>,
    by_ino: HashMap<u64, Arc<Entry>>,
    /// Resolutions started but not yet reported.
    outstanding: u64,
    /// Set once the generation is published; resolution reports are then
    /// routed through the snapshot instead of the live maps.
    resolving: Option<Arc<Snapshot>>,
}

/// The single-writer assembler task.
async fn assemble(
    mut rx: mpsc::Receiver<IndexMsg>,
    tx: mpsc::Sender<IndexMsg>,
    catalog: Arc<Catalog>,
    published_tx: watch::Sender<u64>,
    stable_tx: watch::Sender<u64>,
) {
    let mut next_ino = FIRST_INODE;
    let mut generation: u64 = 0;
    let mut build = Building::default();

    while let Some(msg) = rx.recv().await {
        match msg {
            IndexMsg::Discovered(found) => {
                let ino = next_ino;
                next_ino += 1;
                let entry = Arc::new(Entry::new(
                    ino,
                    found.kind,
                    found.name,
                    found.parent,
                    found.backing,
                ));
                build
                    .children
                    .entry(entry.parent.clone())
                    .or_default()
                    .push(Arc::clone(&entry));
                build.by_path.insert(entry.path(), Arc::clone(&entry));
                build.by_ino.insert(ino, Arc::clone(&entry));

                // Directories are sized at construction; everything else
                // resolves concurrently, one task per entry.
                if entry.kind != EntryKind::Directory {
                    build.outstanding += 1;
                    let report = tx.clone();
                    let kind = entry.kind;
                    let backing = entry.backing.clone();
                    tokio::spawn(async move {
                        let size = resolve::resolve(kind, &backing).await;
                        let _ = report.send(IndexMsg::Resolved { ino, size }).await;
                    });
                }
            }
            IndexMsg::ScanDone => {
                generation += 1;
                let snapshot = Arc::new(Snapshot {
                    generation,
                    children: mem::take(&mut build.children),
                    by_path: mem::take(&mut build.by_path),
                    by_ino: mem::take(&mut build.by_ino),
                });
                info!(
                    generation,
                    entries = snapshot.len(),
                    unresolved = build.outstanding,
                    "generation published"
                );
                catalog.publish(Arc::clone(&snapshot));
                let _ = published_tx.send(generation);

                if build.outstanding == 0 {
                    debug!(generation, "generation stable at publish");
                    let _ = stable_tx.send(generation);
                    build = Building::default();
                } else {
                    build.resolving = Some(snapshot);
                }
            }
            IndexMsg::Resolved { ino, size } => {
                let entry = match &build.resolving {
                    Some(snapshot) => snapshot.entry(ino).cloned(),
                    None => build.by_ino.get(&ino).cloned(),
                };
                match entry {
                    Some(entry) => entry.set_size(size),
                    None => warn!(ino, size, "size report for unknown entry"),
                }

                build.outstanding = build.outstanding.saturating_sub(1);
                if build.resolving.is_some() && build.outstanding == 0 {
                    debug!(generation, "generation stable");
                    let _ = stable_tx.send(generation);
                    build = Building::default();
                }
            }
        }
    }
}

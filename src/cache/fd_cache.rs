//! File handle cache.
//!
//! Keeps table files open across reads while enforcing a hard budget on the
//! number of simultaneously open descriptors.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::Address;
use crate::error::{Result, StoreError};
use crate::table::table_file_path;

struct OpenFile {
    file: Arc<File>,
    /// Outstanding `FileRef` guards
    refs: usize,
    /// Last use, for least-recently-used reclaim
    tick: u64,
    /// Evicted while referenced: close on last release
    retired: bool,
}

#[derive(Default)]
struct Inner {
    files: HashMap<Address, OpenFile>,
    /// Slots reserved by opens in flight (counted against the budget)
    pending: usize,
    next_tick: u64,
}

impl Inner {
    fn in_use(&self) -> usize {
        self.files.len() + self.pending
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Close unreferenced files, oldest first, until at most `target` slots
    /// are in use. Returns the number closed.
    fn reclaim(&mut self, target: usize) -> usize {
        let excess = self.in_use().saturating_sub(target);
        if excess == 0 {
            return 0;
        }

        let mut idle: Vec<(u64, Address)> = self
            .files
            .iter()
            .filter(|(_, open)| open.refs == 0)
            .map(|(name, open)| (open.tick, *name))
            .collect();
        idle.sort_unstable();

        let mut closed = 0;
        for (_, name) in idle.into_iter().take(excess) {
            self.files.remove(&name);
            closed += 1;
        }
        closed
    }
}

/// Bounded cache of open table files.
///
/// ## Concurrency:
/// - Bookkeeping is guarded by one `parking_lot::Mutex`; `File::open` runs
///   outside it against a reserved slot, so the budget holds even while
///   opens are in flight.
/// - Handles are reference counted through [`FileRef`] guards. Reclaim only
///   ever closes handles with no outstanding guard.
pub struct FdCache {
    dir: PathBuf,
    inner: Mutex<Inner>,
    capacity: usize,
    hits: AtomicU64,
    opens: AtomicU64,
    closes: AtomicU64,
}

impl FdCache {
    /// Create a cache for table files in `dir`, holding at most `capacity`
    /// open descriptors
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }

    /// Borrow an open handle to table `name`, opening it if needed.
    ///
    /// Fails with `FdBudgetExhausted` when every slot is held by an
    /// outstanding reference, and with `TableNotFound` if the file does not
    /// exist.
    pub fn ref_file(&self, name: Address) -> Result<FileRef<'_>> {
        {
            let mut inner = self.inner.lock();
            let tick = inner.tick();
            if let Some(open) = inner.files.get_mut(&name) {
                open.refs += 1;
                open.tick = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(FileRef {
                    cache: self,
                    name,
                    file: Arc::clone(&open.file),
                });
            }

            if inner.in_use() >= self.capacity {
                let closed = inner.reclaim(self.capacity - 1);
                self.closes.fetch_add(closed as u64, Ordering::Relaxed);
            }
            if inner.in_use() >= self.capacity {
                return Err(StoreError::FdBudgetExhausted {
                    budget: self.capacity,
                });
            }
            inner.pending += 1;
        }

        let opened = File::open(self.path(&name));

        let mut inner = self.inner.lock();
        inner.pending -= 1;

        let file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::TableNotFound(name))
            }
            Err(e) => return Err(e.into()),
        };
        self.opens.fetch_add(1, Ordering::Relaxed);

        // A concurrent caller may have opened the same table meanwhile;
        // keep theirs and let ours close on drop.
        let tick = inner.tick();
        let open = inner.files.entry(name).or_insert_with(|| OpenFile {
            file: Arc::new(file),
            refs: 0,
            tick,
            retired: false,
        });
        open.refs += 1;
        open.tick = tick;

        Ok(FileRef {
            cache: self,
            name,
            file: Arc::clone(&open.file),
        })
    }

    /// Close idle handles until there is room for one more open.
    ///
    /// Called before a new table is installed so creating it never pushes the
    /// process past its descriptor budget. Returns the number of handles
    /// closed.
    pub fn shrink_cache(&self) -> usize {
        let closed = self.inner.lock().reclaim(self.capacity - 1);
        if closed > 0 {
            self.closes.fetch_add(closed as u64, Ordering::Relaxed);
            tracing::debug!(closed, "Shrunk file handle cache");
        }
        closed
    }

    /// Forget table `name` (e.g. after it was deleted). A handle still in use
    /// closes when its last reference is released.
    pub fn evict(&self, name: &Address) {
        let mut inner = self.inner.lock();
        let idle = match inner.files.get_mut(name) {
            Some(open) if open.refs == 0 => true,
            Some(open) => {
                open.retired = true;
                false
            }
            None => false,
        };
        if idle {
            inner.files.remove(name);
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Close every idle handle and retire the rest. Returns the number
    /// closed immediately.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.files.len();
        inner.files.retain(|_, open| {
            open.retired = true;
            open.refs > 0
        });
        let closed = before - inner.files.len();
        self.closes.fetch_add(closed as u64, Ordering::Relaxed);
        closed
    }

    fn release(&self, name: &Address) {
        let mut inner = self.inner.lock();
        let close = match inner.files.get_mut(name) {
            Some(open) => {
                open.refs -= 1;
                open.refs == 0 && open.retired
            }
            None => false,
        };
        if close {
            inner.files.remove(name);
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Path of table `name` inside the cache's directory
    pub fn path(&self, name: &Address) -> PathBuf {
        table_file_path(&self.dir, name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding references to table `name`
    pub fn ref_count(&self, name: &Address) -> usize {
        self.inner
            .lock()
            .files
            .get(name)
            .map(|open| open.refs)
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reads served by an already open handle
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Files opened from disk
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Handles closed by reclaim, eviction or shutdown
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }
}

/// A borrowed, reference-counted handle to an open table file.
///
/// The cache never closes the handle while this guard is alive.
pub struct FileRef<'a> {
    cache: &'a FdCache,
    name: Address,
    file: Arc<File>,
}

impl FileRef<'_> {
    pub fn name(&self) -> Address {
        self.name
    }

    /// Fill `buf` from `offset` without moving any shared cursor
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_exact_at(&self.file, buf, offset)
    }

    /// Current length of the file
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl Deref for FileRef<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        &self.file
    }
}

impl Drop for FileRef<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.name);
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

//! Index cache.
//!
//! Byte-bounded LRU of parsed table indexes keyed by table name. Entries are
//! immutable and handed out as `Arc`s, so eviction never invalidates an
//! index a reader already holds; it only forces the next `open` to re-parse.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::Address;
use crate::error::{Result, StoreError};
use crate::table::TableIndex;

struct CachedIndex {
    index: Arc<TableIndex>,
    size: usize,
    /// Recency tick, key into `Inner::recency`
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Address, CachedIndex>,
    /// tick → name, oldest first
    recency: BTreeMap<u64, Address>,
    /// name → number of outstanding locks
    locked: HashMap<Address, usize>,
    total_size: usize,
    next_tick: u64,
}

impl Inner {
    fn touch(&mut self, name: &Address) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(name) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, *name);
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, name: &Address) -> Option<CachedIndex> {
        let entry = self.entries.remove(name)?;
        self.recency.remove(&entry.tick);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Evict least recently used, unlocked entries until under `capacity`.
    /// Returns the number of evicted entries.
    fn reclaim(&mut self, capacity: usize) -> u64 {
        if self.total_size <= capacity {
            return 0;
        }

        let victims: Vec<Address> = {
            let mut over = self.total_size - capacity;
            let mut victims = Vec::new();
            for name in self.recency.values() {
                if over == 0 {
                    break;
                }
                if self.locked.contains_key(name) {
                    continue;
                }
                let size = self.entries[name].size;
                over = over.saturating_sub(size);
                victims.push(*name);
            }
            victims
        };

        for name in &victims {
            self.remove(name);
        }
        victims.len() as u64
    }
}

/// Size-accounted cache of parsed table indexes.
///
/// ## Concurrency:
/// - One `parking_lot::Mutex` guards all bookkeeping; it is only held for
///   map operations, never across disk I/O.
/// - `lock_entry`/`unlock_entry` pin a name so a reclaim pass cannot evict
///   it while it is being populated. Two callers may still race to `put`
///   the same name; the last one wins, which is safe because content for a
///   given name is always identical.
pub struct IndexCache {
    inner: Mutex<Inner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl IndexCache {
    /// Create a cache holding at most `capacity` bytes of parsed indexes
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a cached index, marking it most recently used
    pub fn get(&self, name: &Address) -> Option<Arc<TableIndex>> {
        let mut inner = self.inner.lock();
        let cached = inner.entries.get(name).map(|entry| Arc::clone(&entry.index));
        match cached {
            Some(index) => {
                inner.touch(name);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(index)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an index, then reclaim down to capacity
    pub fn put(&self, name: Address, index: Arc<TableIndex>) {
        let size = index.size_estimate();
        let mut inner = self.inner.lock();

        inner.remove(&name);

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.entries.insert(name, CachedIndex { index, size, tick });
        inner.recency.insert(tick, name);
        inner.total_size += size;

        let evicted = inner.reclaim(self.capacity);
        drop(inner);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(evicted, "Index cache reclaimed entries");
        }
    }

    /// Pin `name` so reclaim passes skip it until `unlock_entry`
    pub fn lock_entry(&self, name: Address) {
        *self.inner.lock().locked.entry(name).or_insert(0) += 1;
    }

    /// Release one lock on `name`; errors if it was not locked
    pub fn unlock_entry(&self, name: Address) -> Result<()> {
        let mut inner = self.inner.lock();

        match inner.locked.get_mut(&name) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                inner.locked.remove(&name);
            }
            None => return Err(StoreError::EntryNotLocked(name)),
        }

        let evicted = inner.reclaim(self.capacity);
        drop(inner);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Drop a cached index (e.g. after its table was deleted)
    pub fn remove(&self, name: &Address) -> bool {
        self.inner.lock().remove(name).is_some()
    }

    pub fn contains(&self, name: &Address) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    /// Drop every unlocked entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let names: Vec<Address> = inner
            .entries
            .keys()
            .filter(|name| !inner.locked.contains_key(*name))
            .copied()
            .collect();
        for name in &names {
            inner.remove(name);
        }
    }

    /// Number of cached indexes
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted size of all cached indexes
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().total_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

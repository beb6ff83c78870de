//! Tests for IndexCache
//!
//! These tests verify:
//! - Get/put with hit and miss accounting
//! - Byte-bounded LRU eviction
//! - Locked entries survive reclaim
//! - Unlock errors and deferred reclaim
//! - Concurrent access

use std::sync::Arc;
use std::thread;

use chunkstore::address::Address;
use chunkstore::cache::IndexCache;
use chunkstore::table::{TableIndex, TableWriter};
use chunkstore::StoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn index_with(chunks: usize, seed: u8) -> Arc<TableIndex> {
    let mut writer = TableWriter::default();
    for i in 0..chunks {
        let payload = [seed, i as u8, (i >> 8) as u8];
        writer.add(Address::of(&payload), &payload).unwrap();
    }
    Arc::new(writer.finish().unwrap().1)
}

fn name(n: u8) -> Address {
    Address::of(&[n])
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_get_miss_then_hit() {
    let cache = IndexCache::new(1 << 20);
    let index = index_with(4, 1);

    assert!(cache.get(&name(1)).is_none());
    cache.put(name(1), Arc::clone(&index));

    let cached = cache.get(&name(1)).unwrap();
    assert!(Arc::ptr_eq(&cached, &index));
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.size_bytes(), index.size_estimate());
}

#[test]
fn test_put_replaces_existing() {
    let cache = IndexCache::new(1 << 20);
    cache.put(name(1), index_with(2, 1));
    let replacement = index_with(8, 2);
    cache.put(name(1), Arc::clone(&replacement));

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.size_bytes(), replacement.size_estimate());
    assert_eq!(cache.get(&name(1)).unwrap().chunk_count(), 8);
}

#[test]
fn test_remove_and_clear() {
    let cache = IndexCache::new(1 << 20);
    cache.put(name(1), index_with(1, 1));
    cache.put(name(2), index_with(1, 2));

    assert!(cache.remove(&name(1)));
    assert!(!cache.remove(&name(1)));
    assert!(!cache.contains(&name(1)));

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.size_bytes(), 0);
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_evicts_least_recently_used() {
    let size = index_with(16, 0).size_estimate();
    // Room for exactly two indexes
    let cache = IndexCache::new(size * 2);

    cache.put(name(1), index_with(16, 1));
    cache.put(name(2), index_with(16, 2));
    // Touch 1 so that 2 becomes the oldest
    assert!(cache.get(&name(1)).is_some());
    cache.put(name(3), index_with(16, 3));

    assert!(cache.contains(&name(1)));
    assert!(!cache.contains(&name(2)));
    assert!(cache.contains(&name(3)));
    assert_eq!(cache.evictions(), 1);
    assert!(cache.size_bytes() <= cache.capacity());
}

#[test]
fn test_locked_entry_is_not_evicted() {
    let size = index_with(16, 0).size_estimate();
    let cache = IndexCache::new(size);

    cache.lock_entry(name(1));
    cache.put(name(1), index_with(16, 1));
    cache.put(name(2), index_with(16, 2));

    // 1 is pinned, so the newer unlocked entry goes instead
    assert!(cache.contains(&name(1)));
    assert!(!cache.contains(&name(2)));

    cache.unlock_entry(name(1)).unwrap();
    cache.put(name(3), index_with(16, 3));
    assert!(!cache.contains(&name(1)));
    assert!(cache.contains(&name(3)));
}

#[test]
fn test_unlock_reclaims_over_budget() {
    let size = index_with(16, 0).size_estimate();
    let cache = IndexCache::new(size);

    cache.lock_entry(name(1));
    cache.lock_entry(name(2));
    cache.put(name(1), index_with(16, 1));
    cache.put(name(2), index_with(16, 2));

    // Both pinned: over budget until one is released
    assert_eq!(cache.len(), 2);
    cache.unlock_entry(name(1)).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&name(2)));

    cache.unlock_entry(name(2)).unwrap();
    assert!(cache.size_bytes() <= cache.capacity());
}

#[test]
fn test_nested_locks() {
    let size = index_with(16, 0).size_estimate();
    let cache = IndexCache::new(size);

    cache.lock_entry(name(1));
    cache.lock_entry(name(1));
    cache.put(name(1), index_with(16, 1));
    cache.unlock_entry(name(1)).unwrap();

    // Still held once
    cache.put(name(2), index_with(16, 2));
    assert!(cache.contains(&name(1)));

    cache.unlock_entry(name(1)).unwrap();
}

#[test]
fn test_unlock_without_lock_fails() {
    let cache = IndexCache::new(1024);
    let result = cache.unlock_entry(name(9));
    assert!(matches!(result, Err(StoreError::EntryNotLocked(n)) if n == name(9)));
}

#[test]
fn test_clear_keeps_locked_entries() {
    let cache = IndexCache::new(1 << 20);
    cache.lock_entry(name(1));
    cache.put(name(1), index_with(1, 1));
    cache.put(name(2), index_with(1, 2));

    cache.clear();

    assert!(cache.contains(&name(1)));
    assert!(!cache.contains(&name(2)));
    cache.unlock_entry(name(1)).unwrap();
}

#[test]
fn test_evicted_index_stays_valid_for_holders() {
    let size = index_with(16, 0).size_estimate();
    let cache = IndexCache::new(size);

    cache.put(name(1), index_with(16, 1));
    let held = cache.get(&name(1)).unwrap();
    cache.put(name(2), index_with(16, 2));

    assert!(!cache.contains(&name(1)));
    assert_eq!(held.chunk_count(), 16);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_put_get() {
    let size = index_with(4, 0).size_estimate();
    let cache = Arc::new(IndexCache::new(size * 8));

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50u8 {
                    let key = name(t.wrapping_mul(50).wrapping_add(i));
                    cache.lock_entry(key);
                    cache.put(key, index_with(4, i));
                    assert!(cache.get(&key).is_some());
                    cache.unlock_entry(key).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.size_bytes() <= cache.capacity());
}

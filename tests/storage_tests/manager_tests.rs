//! Tests for StorageManager
//!
//! These tests verify:
//! - Opening/creating storage directories
//! - Flushing MemTables to tables and the manifest
//! - Querying across multiple tables
//! - Conjoining tables and deleting the merged inputs
//! - Persistence (restart and reopen from the manifest)
//! - Removal of orphaned temp files and unreferenced tables

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chunkstore::address::Address;
use chunkstore::memtable::MemTable;
use chunkstore::storage::{
    remove_garbage, ChunkHaver, Manifest, MergeAll, SizeTiered, StorageManager,
    TableSpec, MANIFEST_FILENAME, TEMP_MANIFEST_PREFIX, TEMP_TABLE_PREFIX,
};
use chunkstore::table::table_file_path;
use chunkstore::{CancelToken, Config, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn config(path: &Path) -> Config {
    Config::builder().data_dir(path).max_open_files(8).build()
}

fn temp_manifests(path: &Path) -> usize {
    fs::read_dir(path)
        .unwrap()
        .filter_map(|e| e.unwrap().file_name().into_string().ok())
        .filter(|n| n.starts_with(TEMP_MANIFEST_PREFIX))
        .count()
}

fn memtable_with(payloads: &[&[u8]]) -> MemTable {
    let mut memtable = MemTable::new();
    for payload in payloads {
        memtable.add(payload.to_vec());
    }
    memtable
}

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("new_storage");

    assert!(!path.exists());

    let _manager = StorageManager::open(&config(&path)).unwrap();

    assert!(path.exists());
    assert!(path.is_dir());
}

#[test]
fn test_open_empty_directory() {
    let (_temp, path) = setup_temp_storage();

    let manager = StorageManager::open(&config(&path)).unwrap();

    assert_eq!(manager.table_count(), 0);
    assert_eq!(manager.chunk_count(), 0);
    assert_eq!(manager.manifest_version(), 0);
}

#[test]
fn test_open_rejects_invalid_config() {
    let (_temp, path) = setup_temp_storage();
    let config = Config::builder().data_dir(&path).max_open_files(0).build();

    let result = StorageManager::open(&config);
    assert!(matches!(result, Err(StoreError::Config(_))));
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_and_get() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    let table = manager
        .flush(&ctx, memtable_with(&[b"apple", b"banana"]))
        .unwrap();

    assert_eq!(table.chunk_count(), 2);
    assert_eq!(manager.table_count(), 1);
    assert_eq!(manager.manifest_version(), 1);
    assert_eq!(
        manager.get(&Address::of(b"apple")).unwrap().unwrap().as_ref(),
        b"apple"
    );
    assert!(manager.get(&Address::of(b"cherry")).unwrap().is_none());
    assert!(manager.has(&Address::of(b"banana")).unwrap());
}

#[test]
fn test_flush_skips_stored_chunks() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    manager.flush(&ctx, memtable_with(&[b"a", b"b"])).unwrap();
    let second = manager.flush(&ctx, memtable_with(&[b"b", b"c"])).unwrap();

    assert_eq!(second.chunk_count(), 1);
    assert_eq!(manager.table_count(), 2);
    assert_eq!(manager.chunk_count(), 3);
}

#[test]
fn test_flush_nothing_new_leaves_tables_unchanged() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    manager.flush(&ctx, memtable_with(&[b"a"])).unwrap();
    let version = manager.manifest_version();

    let table = manager.flush(&ctx, memtable_with(&[b"a"])).unwrap();
    assert_eq!(table.name(), Address::EMPTY);
    assert_eq!(manager.table_count(), 1);
    assert_eq!(manager.manifest_version(), version);

    manager.flush(&ctx, MemTable::new()).unwrap();
    assert_eq!(manager.table_count(), 1);
}

#[test]
fn test_sources_newest_first() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    let older = manager.flush(&ctx, memtable_with(&[b"old"])).unwrap();
    let newer = manager.flush(&ctx, memtable_with(&[b"new"])).unwrap();

    let names: Vec<Address> = manager.sources().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec![newer.name(), older.name()]);
}

// =============================================================================
// Conjoin Tests
// =============================================================================

#[test]
fn test_conjoin_merges_and_deletes_inputs() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    let a = manager.flush(&ctx, memtable_with(&[b"A", b"B"])).unwrap();
    let b = manager.flush(&ctx, memtable_with(&[b"C"])).unwrap();

    let merged = manager.conjoin(&ctx, &MergeAll).unwrap().unwrap();

    assert_eq!(merged.chunk_count(), 3);
    assert_eq!(manager.table_count(), 1);
    assert!(!table_file_path(&path, &a.name()).exists());
    assert!(!table_file_path(&path, &b.name()).exists());
    assert!(table_file_path(&path, &merged.name()).exists());

    for payload in [&b"A"[..], b"B", b"C"] {
        assert_eq!(
            manager.get(&Address::of(payload)).unwrap().unwrap().as_ref(),
            payload
        );
    }
}

#[test]
fn test_conjoin_single_table_is_noop() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    manager.flush(&ctx, memtable_with(&[b"A"])).unwrap();
    let version = manager.manifest_version();

    assert!(manager.conjoin(&ctx, &MergeAll).unwrap().is_none());
    assert_eq!(manager.manifest_version(), version);
}

#[test]
fn test_conjoin_size_tiered_keeps_largest() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    let big = manager
        .flush(&ctx, memtable_with(&[b"1", b"2", b"3", b"4"]))
        .unwrap();
    manager.flush(&ctx, memtable_with(&[b"5"])).unwrap();
    manager.flush(&ctx, memtable_with(&[b"6"])).unwrap();

    manager
        .conjoin(&ctx, &SizeTiered { max_tables: 2 })
        .unwrap()
        .unwrap();

    assert_eq!(manager.table_count(), 2);
    assert!(manager.sources().iter().any(|s| s.name() == big.name()));
    assert_eq!(manager.chunk_count(), 6);
}

#[test]
fn test_conjoin_cancelled_keeps_tables() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    manager.flush(&ctx, memtable_with(&[b"A"])).unwrap();
    manager.flush(&ctx, memtable_with(&[b"B"])).unwrap();

    let cancelled = CancelToken::new();
    cancelled.cancel();
    let result = manager.conjoin(&cancelled, &MergeAll);

    assert!(matches!(result, Err(StoreError::Cancelled)));
    assert_eq!(manager.table_count(), 2);
    assert!(manager.get(&Address::of(b"A")).unwrap().is_some());
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_restores_tables() {
    let (_temp, path) = setup_temp_storage();
    let ctx = CancelToken::new();

    {
        let manager = StorageManager::open(&config(&path)).unwrap();
        manager.flush(&ctx, memtable_with(&[b"one", b"two"])).unwrap();
        manager.flush(&ctx, memtable_with(&[b"three"])).unwrap();
        manager.close();
    }

    let manager = StorageManager::open(&config(&path)).unwrap();
    assert_eq!(manager.table_count(), 2);
    assert_eq!(manager.chunk_count(), 3);
    assert_eq!(manager.manifest_version(), 2);
    assert_eq!(
        manager.get(&Address::of(b"three")).unwrap().unwrap().as_ref(),
        b"three"
    );
}

#[test]
fn test_reopen_after_conjoin() {
    let (_temp, path) = setup_temp_storage();
    let ctx = CancelToken::new();

    let merged_name = {
        let manager = StorageManager::open(&config(&path)).unwrap();
        manager.flush(&ctx, memtable_with(&[b"x"])).unwrap();
        manager.flush(&ctx, memtable_with(&[b"y"])).unwrap();
        let merged = manager.conjoin(&ctx, &MergeAll).unwrap().unwrap();
        manager.close();
        merged.name()
    };

    let manager = StorageManager::open(&config(&path)).unwrap();
    assert_eq!(manager.table_count(), 1);
    assert_eq!(manager.sources()[0].name(), merged_name);
    assert!(manager.has(&Address::of(b"y")).unwrap());
}

#[test]
fn test_reopen_without_index_cache() {
    let (_temp, path) = setup_temp_storage();
    let ctx = CancelToken::new();

    {
        let manager = StorageManager::open(&config(&path)).unwrap();
        manager.flush(&ctx, memtable_with(&[b"x", b"y"])).unwrap();
    }

    let config = Config::builder()
        .data_dir(&path)
        .index_cache_bytes(0)
        .max_open_files(1)
        .build();
    let manager = StorageManager::open(&config).unwrap();

    assert!(manager.index_cache().is_none());
    assert_eq!(manager.get(&Address::of(b"x")).unwrap().unwrap().as_ref(), b"x");
}

#[test]
fn test_manifest_round_trip_on_disk() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&config(&path)).unwrap();
    let ctx = CancelToken::new();

    manager.flush(&ctx, memtable_with(&[b"a"])).unwrap();
    manager.flush(&ctx, memtable_with(&[b"b", b"c"])).unwrap();

    let manifest = Manifest::load(&path).unwrap();
    assert_eq!(manifest.version, manager.manifest_version());
    assert_eq!(manifest.tables, manager.table_specs());
    assert_eq!(manifest.chunk_count(), 3);
}

#[test]
fn test_manifest_store_synced() {
    let (_temp, path) = setup_temp_storage();
    let manifest = Manifest {
        version: 7,
        tables: vec![TableSpec {
            name: Address::of(b"t"),
            chunk_count: 3,
        }],
    };

    manifest.store(&path, true).unwrap();
    Manifest {
        version: 8,
        tables: Vec::new(),
    }
    .store(&path, true)
    .unwrap();

    let loaded = Manifest::load(&path).unwrap();
    assert_eq!(loaded.version, 8);
    assert!(loaded.tables.is_empty());
    assert_eq!(temp_manifests(&path), 0);
}

#[test]
fn test_conjoin_manifest_durable_before_delete() {
    let (_temp, path) = setup_temp_storage();
    let ctx = CancelToken::new();
    let config = Config::builder()
        .data_dir(&path)
        .sync_writes(true)
        .build();

    let merged = {
        let manager = StorageManager::open(&config).unwrap();
        manager.flush(&ctx, memtable_with(&[b"A"])).unwrap();
        manager.flush(&ctx, memtable_with(&[b"B"])).unwrap();
        let merged = manager.conjoin(&ctx, &MergeAll).unwrap().unwrap();
        assert_eq!(temp_manifests(&path), 0);
        merged.name()
    };

    let manifest = Manifest::load(&path).unwrap();
    assert_eq!(manifest.tables.len(), 1);
    assert_eq!(manifest.tables[0].name, merged);

    let manager = StorageManager::open(&config).unwrap();
    assert!(manager.get(&Address::of(b"B")).unwrap().is_some());
}

#[test]
fn test_corrupt_manifest_fails_open() {
    let (_temp, path) = setup_temp_storage();
    {
        let manager = StorageManager::open(&config(&path)).unwrap();
        manager
            .flush(&CancelToken::new(), memtable_with(&[b"a"]))
            .unwrap();
    }

    let manifest_path = path.join(MANIFEST_FILENAME);
    let mut bytes = fs::read(&manifest_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&manifest_path, &bytes).unwrap();

    let result = StorageManager::open(&config(&path));
    assert!(matches!(result, Err(StoreError::Manifest(_))));
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[test]
fn test_open_removes_orphans() {
    let (_temp, path) = setup_temp_storage();
    let ctx = CancelToken::new();

    let live = {
        let manager = StorageManager::open(&config(&path)).unwrap();
        manager.flush(&ctx, memtable_with(&[b"keep"])).unwrap()
    };
    let live_name = live.name();
    drop(live);

    let orphan_temp = path.join(format!("{}abc123", TEMP_TABLE_PREFIX));
    fs::write(&orphan_temp, b"partial").unwrap();
    let dead_table = table_file_path(&path, &Address::of(b"unreferenced"));
    fs::write(&dead_table, b"old").unwrap();
    let unrelated = path.join("notes.txt");
    fs::write(&unrelated, b"leave me").unwrap();

    let manager = StorageManager::open(&config(&path)).unwrap();
    let report = manager.cleanup_report();

    assert_eq!(report.temp_files, 1);
    assert_eq!(report.tables, 1);
    assert!(!orphan_temp.exists());
    assert!(!dead_table.exists());
    assert!(unrelated.exists());
    assert!(table_file_path(&path, &live_name).exists());
}

#[test]
fn test_remove_garbage_respects_live_set() {
    let (_temp, path) = setup_temp_storage();
    let keep = Address::of(b"keep");
    let drop_me = Address::of(b"drop");
    fs::write(table_file_path(&path, &keep), b"k").unwrap();
    fs::write(table_file_path(&path, &drop_me), b"d").unwrap();

    let live: HashSet<Address> = [keep].into_iter().collect();
    let report = remove_garbage(&path, &live).unwrap();

    assert_eq!(report.tables, 1);
    assert_eq!(report.temp_files, 0);
    assert!(table_file_path(&path, &keep).exists());
    assert!(!table_file_path(&path, &drop_me).exists());
}

#[test]
fn test_open_without_manifest_removes_tables() {
    let (_temp, path) = setup_temp_storage();

    // Tables written straight through a persister are never listed
    let name = {
        let manager = StorageManager::open(&config(&path)).unwrap();
        let source = manager.flush(&CancelToken::new(), memtable_with(&[b"loose"])).unwrap();
        source.name()
    };
    fs::remove_file(path.join(MANIFEST_FILENAME)).unwrap();

    let manager = StorageManager::open(&config(&path)).unwrap();

    assert_eq!(manager.cleanup_report().tables, 1);
    assert_eq!(manager.table_count(), 0);
    assert!(!table_file_path(&path, &name).exists());
}

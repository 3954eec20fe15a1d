//! RocksDB-backed project store.
//!
//! Column families:
//! - `projects`       — project records (owner, members, `head_seq`), bincode
//! - `snapshots`      — materialized element-snapshot JSON (LZ4 compressed)
//! - `operations`     — append-only op log, keyed `project_id ++ seq` (BE)
//! - `element_latest` — latest durable `(seq, elementVer, kind)` per element
//!
//! Sequence claims, op appends, and snapshot rewrites are serialized through
//! a store-level mutex; a single process owns the store, so this is
//! linearizable. Appends go through one `WriteBatch` that also refreshes the
//! conflict index, keeping the max-seq entry per element.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{now_rfc3339, OpKind, Operation};

/// Column family names.
const CF_PROJECTS: &str = "projects";
const CF_SNAPSHOTS: &str = "snapshots";
const CF_OPERATIONS: &str = "operations";
const CF_ELEMENT_LATEST: &str = "element_latest";

const COLUMN_FAMILIES: &[&str] = &[CF_PROJECTS, CF_SNAPSHOTS, CF_OPERATIONS, CF_ELEMENT_LATEST];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("atelier_data"),
            block_cache_size: 128 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// The project document: ownership, membership, and the sequence head.
///
/// Project CRUD lives outside the core; this record is the slice the
/// collaboration pipeline reads and advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub owner: String,
    pub members: Vec<String>,
    /// Monotonic per-project sequence head, initially 0.
    pub head_seq: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRecord {
    pub fn new(id: Uuid, owner: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id,
            owner: owner.into(),
            members: Vec::new(),
            head_seq: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_members(mut self, members: Vec<String>) -> Self {
        self.members = members;
        self
    }

    /// The membership predicate gating all write paths.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.owner == user_id || self.members.iter().any(|m| m == user_id)
    }
}

/// Latest durable op per `(project, element)`, used for conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementLatest {
    pub seq: i64,
    pub element_ver: i32,
    pub kind: OpKind,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    Database(String),
    /// Project missing or the user lacks access; the two are not
    /// distinguished, so callers cannot probe for project existence.
    NotAuthorized,
    /// Project record not found
    NotFound(Uuid),
    /// Serialization failed
    Serialization(String),
    /// Deserialization failed
    Deserialization(String),
    /// Snapshot compression error
    Compression(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::NotAuthorized => write!(f, "Project not found or access denied"),
            StoreError::NotFound(id) => write!(f, "Project not found: {id}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// RocksDB-backed store for project records, snapshots, and the op log.
pub struct ProjectStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes project-document read-modify-writes: sequence claims,
    /// op appends (the conflict-index refresh), and snapshot rewrites.
    project_rmw: Mutex<()>,
}

impl ProjectStore {
    /// Open the store at the configured path, creating the database and
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(name, &config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            project_rmw: Mutex::new(()),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_PROJECTS | CF_SNAPSHOTS | CF_ELEMENT_LATEST => {
                // Point lookups by project / (project, element) key
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_OPERATIONS => {
                // Many small appends, prefix-scanned by project_id
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            _ => {}
        }

        opts
    }

    // ─── Project records ──────────────────────────────────────────────

    /// Install or replace a project record. This is the seam the external
    /// project CRUD layer writes through.
    pub fn put_project(&self, record: &ProjectRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_PROJECTS)?;
        self.db
            .put_cf_opt(&cf, record.id.as_bytes(), encode(record)?, &self.write_opts())?;
        Ok(())
    }

    /// Load a project record.
    pub fn load_project(&self, project_id: Uuid) -> Result<ProjectRecord, StoreError> {
        let cf = self.cf(CF_PROJECTS)?;
        match self.db.get_cf(&cf, project_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(project_id)),
        }
    }

    // ─── Sequence allocation ──────────────────────────────────────────

    /// Atomically claim `count` sequence numbers on a project.
    ///
    /// Applies the membership predicate and `head_seq += count` in one
    /// read-modify-write, returning the post-update record; the claimed range
    /// is `[head_seq - count + 1, head_seq]`. A missing project and a failed
    /// membership check both surface as [`StoreError::NotAuthorized`].
    pub fn claim_sequence(
        &self,
        project_id: Uuid,
        user_id: &str,
        count: i64,
    ) -> Result<ProjectRecord, StoreError> {
        let _guard = self
            .project_rmw
            .lock()
            .map_err(|_| StoreError::Database("project lock poisoned".into()))?;

        let cf = self.cf(CF_PROJECTS)?;
        let key = project_id.as_bytes();
        let mut record: ProjectRecord = match self.db.get_cf(&cf, key)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(StoreError::NotAuthorized),
        };
        if !record.is_member(user_id) {
            return Err(StoreError::NotAuthorized);
        }

        record.head_seq += count;
        record.updated_at = now_rfc3339();
        self.db
            .put_cf_opt(&cf, key, encode(&record)?, &self.write_opts())?;

        Ok(record)
    }

    // ─── Operation log ────────────────────────────────────────────────

    /// Append accepted operations and refresh the conflict index in one
    /// atomic batch. Callers are acknowledged only after this returns.
    ///
    /// The index update is monotonic by seq and runs under the project
    /// mutex: concurrent batches append in arbitrary order, and an entry for
    /// a lower seq must never overwrite one written for a higher seq.
    pub fn append_ops(&self, ops: &[Operation]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_latest = self.cf(CF_ELEMENT_LATEST)?;

        let _guard = self
            .project_rmw
            .lock()
            .map_err(|_| StoreError::Database("project lock poisoned".into()))?;

        let mut batch = WriteBatch::default();
        let mut latest_by_element: HashMap<Vec<u8>, ElementLatest> = HashMap::new();
        for op in ops {
            batch.put_cf(&cf_ops, op_key(op.project_id, op.seq), encode(op)?);
            let entry = ElementLatest {
                seq: op.seq,
                element_ver: op.element_ver,
                kind: op.kind,
            };
            match latest_by_element.entry(element_key(op.project_id, &op.element_id)) {
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    if slot.get().seq < entry.seq {
                        slot.insert(entry);
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }

        for (key, entry) in latest_by_element {
            let superseded = match self.db.get_cf(&cf_latest, &key)? {
                Some(bytes) => decode::<ElementLatest>(&bytes)?.seq >= entry.seq,
                None => false,
            };
            if !superseded {
                batch.put_cf(&cf_latest, &key, encode(&entry)?);
            }
        }

        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    /// Ops with `seq > since_seq`, ascending, at most `limit`.
    ///
    /// The result is a lower bound while appends are in flight; readers poll.
    pub fn ops_since(
        &self,
        project_id: Uuid,
        since_seq: i64,
        limit: usize,
    ) -> Result<Vec<Operation>, StoreError> {
        let start = since_seq.saturating_add(1).max(1);
        self.scan_ops(project_id, start, i64::MAX, limit)
    }

    /// Ops with `from_seq <= seq <= to_seq`, ascending, inclusive both ends.
    pub fn ops_range(
        &self,
        project_id: Uuid,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<Operation>, StoreError> {
        self.scan_ops(project_id, from_seq.max(1), to_seq, usize::MAX)
    }

    fn scan_ops(
        &self,
        project_id: Uuid,
        from_seq: i64,
        to_seq: i64,
        limit: usize,
    ) -> Result<Vec<Operation>, StoreError> {
        if to_seq < from_seq || limit == 0 {
            return Ok(Vec::new());
        }

        let cf = self.cf(CF_OPERATIONS)?;
        let start_key = op_key(project_id, from_seq);

        let mut ops = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != project_id.as_bytes() {
                break;
            }

            let mut seq_buf = [0u8; 8];
            seq_buf.copy_from_slice(&key[16..24]);
            let seq = u64::from_be_bytes(seq_buf) as i64;
            if seq > to_seq {
                break;
            }

            ops.push(decode(&value)?);
            if ops.len() >= limit {
                break;
            }
        }

        Ok(ops)
    }

    /// Latest durable `(seq, elementVer, kind)` for each referenced element.
    /// Elements with no accepted ops yet are absent from the result.
    pub fn latest_for_elements<'a, I>(
        &self,
        project_id: Uuid,
        element_ids: I,
    ) -> Result<HashMap<String, ElementLatest>, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cf = self.cf(CF_ELEMENT_LATEST)?;
        let mut latest = HashMap::new();

        for element_id in element_ids {
            if latest.contains_key(element_id) {
                continue;
            }
            if let Some(bytes) = self.db.get_cf(&cf, element_key(project_id, element_id))? {
                latest.insert(element_id.to_owned(), decode(&bytes)?);
            }
        }

        Ok(latest)
    }

    // ─── Element snapshots ────────────────────────────────────────────

    /// Load the materialized snapshot JSON. A project with no snapshot yet
    /// reads as the empty array.
    pub fn load_elements(&self, project_id: Uuid) -> Result<String, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, project_id.as_bytes())? {
            Some(compressed) => {
                let bytes = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                String::from_utf8(bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))
            }
            None => Ok("[]".to_owned()),
        }
    }

    /// Install a snapshot directly (project creation seam and repair path).
    pub fn put_elements(&self, project_id: Uuid, elements: &str) -> Result<(), StoreError> {
        let _guard = self
            .project_rmw
            .lock()
            .map_err(|_| StoreError::Database("project lock poisoned".into()))?;
        self.write_snapshot(project_id, elements)
    }

    /// Read-modify-write the snapshot under the project mutex, so concurrent
    /// materializations cannot lose each other's batches. Also bumps the
    /// project's `updated_at`.
    pub fn update_elements<F>(&self, project_id: Uuid, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&str) -> Result<String, StoreError>,
    {
        let _guard = self
            .project_rmw
            .lock()
            .map_err(|_| StoreError::Database("project lock poisoned".into()))?;

        let current = self.load_elements(project_id)?;
        let next = apply(&current)?;

        let cf_projects = self.cf(CF_PROJECTS)?;
        let mut record = match self.db.get_cf(&cf_projects, project_id.as_bytes())? {
            Some(bytes) => decode::<ProjectRecord>(&bytes)?,
            None => return Err(StoreError::NotFound(project_id)),
        };
        record.updated_at = now_rfc3339();

        let cf_snapshots = self.cf(CF_SNAPSHOTS)?;
        let compressed = lz4_flex::compress_prepend_size(next.as_bytes());

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snapshots, project_id.as_bytes(), &compressed);
        batch.put_cf(&cf_projects, project_id.as_bytes(), encode(&record)?);
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn write_snapshot(&self, project_id: Uuid, elements: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let compressed = lz4_flex::compress_prepend_size(elements.as_bytes());
        self.db
            .put_cf_opt(&cf, project_id.as_bytes(), &compressed, &self.write_opts())?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }
}

/// Op log key: project_id (16 bytes) + seq (8 bytes big-endian).
fn op_key(project_id: Uuid, seq: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(project_id.as_bytes());
    key.extend_from_slice(&(seq as u64).to_be_bytes());
    key
}

/// Conflict index key: project_id (16 bytes) + element id bytes.
fn element_key(project_id: Uuid, element_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + element_id.len());
    key.extend_from_slice(project_id.as_bytes());
    key.extend_from_slice(element_id.as_bytes());
    key
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OpInput, OpKind};
    use std::fs;
    use std::sync::Arc;

    /// Create a temp directory for test database.
    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("atelier_test_rocks_{name}_{}", Uuid::new_v4()))
    }

    /// Clean up test database.
    fn cleanup(path: &Path) {
        let _ = fs::remove_dir_all(path);
    }

    fn open_store(path: &Path) -> ProjectStore {
        ProjectStore::open(StoreConfig::for_testing(path)).unwrap()
    }

    fn seeded_project(store: &ProjectStore, owner: &str) -> Uuid {
        let id = Uuid::new_v4();
        store.put_project(&ProjectRecord::new(id, owner)).unwrap();
        id
    }

    fn op(project_id: Uuid, seq: i64, element_id: &str, element_ver: i32) -> Operation {
        let input = OpInput {
            client_seq: seq as i32,
            kind: OpKind::Update,
            element_id: element_id.into(),
            element_ver,
            base_seq: 0,
            data: Some(format!(r#"{{"id":"{element_id}"}}"#)),
        };
        Operation::sequenced(project_id, seq, "00000000", &input)
    }

    #[test]
    fn test_store_open_close() {
        let path = temp_db_path("open_close");
        let store = open_store(&path);
        assert!(store.path().exists());
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_project_put_load() {
        let path = temp_db_path("project");
        let store = open_store(&path);

        let id = Uuid::new_v4();
        let record = ProjectRecord::new(id, "alice").with_members(vec!["bob".into()]);
        store.put_project(&record).unwrap();

        let loaded = store.load_project(id).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.head_seq, 0);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_project_not_found() {
        let path = temp_db_path("project_missing");
        let store = open_store(&path);
        assert!(matches!(
            store.load_project(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_claim_sequence_owner() {
        let path = temp_db_path("claim_owner");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        let record = store.claim_sequence(id, "alice", 3).unwrap();
        assert_eq!(record.head_seq, 3);

        let record = store.claim_sequence(id, "alice", 2).unwrap();
        assert_eq!(record.head_seq, 5);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_claim_sequence_member() {
        let path = temp_db_path("claim_member");
        let store = open_store(&path);

        let id = Uuid::new_v4();
        store
            .put_project(&ProjectRecord::new(id, "alice").with_members(vec!["bob".into()]))
            .unwrap();

        let record = store.claim_sequence(id, "bob", 1).unwrap();
        assert_eq!(record.head_seq, 1);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_claim_sequence_rejects_outsiders() {
        let path = temp_db_path("claim_outsider");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        assert!(matches!(
            store.claim_sequence(id, "mallory", 1),
            Err(StoreError::NotAuthorized)
        ));
        // Head untouched
        assert_eq!(store.load_project(id).unwrap().head_seq, 0);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_claim_sequence_missing_project_indistinguishable() {
        let path = temp_db_path("claim_missing");
        let store = open_store(&path);

        assert!(matches!(
            store.claim_sequence(Uuid::new_v4(), "alice", 1),
            Err(StoreError::NotAuthorized)
        ));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        let path = temp_db_path("claim_concurrent");
        let store = Arc::new(open_store(&path));
        let id = seeded_project(&store, "alice");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let mut ranges = Vec::new();
                for _ in 0..25 {
                    let record = store.claim_sequence(id, "alice", 2).unwrap();
                    ranges.push((record.head_seq - 1, record.head_seq));
                }
                ranges
            }));
        }

        let mut all: Vec<(i64, i64)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();

        // 100 claims of 2 → head 200, ranges disjoint and contiguous
        assert_eq!(store.load_project(id).unwrap().head_seq, 200);
        let mut expected_start = 1;
        for (start, end) in all {
            assert_eq!(start, expected_start);
            assert_eq!(end, start + 1);
            expected_start = end + 1;
        }

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_append_and_ops_since() {
        let path = temp_db_path("ops_since");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        let ops: Vec<Operation> = (1..=10).map(|seq| op(id, seq, "el", seq as i32)).collect();
        store.append_ops(&ops).unwrap();

        let tail = store.ops_since(id, 4, 100).unwrap();
        assert_eq!(tail.len(), 6);
        assert_eq!(tail[0].seq, 5);
        assert_eq!(tail[5].seq, 10);

        let limited = store.ops_since(id, 0, 3).unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[2].seq, 3);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_ops_range_inclusive() {
        let path = temp_db_path("ops_range");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        let ops: Vec<Operation> = (1..=10).map(|seq| op(id, seq, "el", seq as i32)).collect();
        store.append_ops(&ops).unwrap();

        let range = store.ops_range(id, 3, 7).unwrap();
        let seqs: Vec<i64> = range.iter().map(|op| op.seq).collect();
        assert_eq!(seqs, [3, 4, 5, 6, 7]);

        assert!(store.ops_range(id, 7, 3).unwrap().is_empty());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_ops_are_isolated_per_project() {
        let path = temp_db_path("ops_isolated");
        let store = open_store(&path);
        let a = seeded_project(&store, "alice");
        let b = seeded_project(&store, "alice");

        store.append_ops(&[op(a, 1, "el", 1), op(a, 2, "el", 2)]).unwrap();
        store.append_ops(&[op(b, 1, "el", 1)]).unwrap();

        assert_eq!(store.ops_since(a, 0, 100).unwrap().len(), 2);
        assert_eq!(store.ops_since(b, 0, 100).unwrap().len(), 1);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_sparse_tail_tolerated() {
        let path = temp_db_path("ops_sparse");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        // Seqs 2 and 5 were claimed but rejected, never persisted
        store
            .append_ops(&[op(id, 1, "a", 1), op(id, 3, "b", 1), op(id, 4, "c", 1)])
            .unwrap();

        let tail = store.ops_since(id, 0, 100).unwrap();
        let seqs: Vec<i64> = tail.iter().map(|op| op.seq).collect();
        assert_eq!(seqs, [1, 3, 4]);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_delete_ops_round_trip() {
        let path = temp_db_path("delete_roundtrip");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        let delete_input = OpInput {
            client_seq: 2,
            kind: OpKind::Delete,
            element_id: "a".into(),
            element_ver: 2,
            base_seq: 1,
            data: None,
        };
        let delete = Operation::sequenced(id, 2, "00000000", &delete_input);
        store.append_ops(&[op(id, 1, "a", 1), delete.clone()]).unwrap();

        let tail = store.ops_since(id, 0, 100).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1], delete);
        assert_eq!(tail[1].kind, OpKind::Delete);
        assert!(tail[1].data.is_none());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_latest_keeps_max_seq_across_out_of_order_appends() {
        let path = temp_db_path("latest_out_of_order");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        // Two batches on the same element claimed [1,2] and [3,4]; the
        // higher range happens to land first
        store.append_ops(&[op(id, 3, "a", 3), op(id, 4, "a", 4)]).unwrap();
        store.append_ops(&[op(id, 1, "a", 1), op(id, 2, "a", 2)]).unwrap();

        let latest = store.latest_for_elements(id, ["a"]).unwrap();
        assert_eq!(latest["a"].seq, 4);
        assert_eq!(latest["a"].element_ver, 4);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_latest_for_elements_tracks_appends() {
        let path = temp_db_path("latest");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        store
            .append_ops(&[op(id, 1, "a", 1), op(id, 2, "a", 2), op(id, 3, "b", 1)])
            .unwrap();

        let latest = store
            .latest_for_elements(id, ["a", "b", "ghost"])
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["a"].seq, 2);
        assert_eq!(latest["a"].element_ver, 2);
        assert_eq!(latest["b"].seq, 3);
        assert!(!latest.contains_key("ghost"));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_elements_default_empty() {
        let path = temp_db_path("elements_default");
        let store = open_store(&path);
        assert_eq!(store.load_elements(Uuid::new_v4()).unwrap(), "[]");
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_elements_roundtrip() {
        let path = temp_db_path("elements_roundtrip");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        let snapshot = r#"[{"id":"a","shape":"rect"},{"id":"b","shape":"line"}]"#;
        store.put_elements(id, snapshot).unwrap();
        assert_eq!(store.load_elements(id).unwrap(), snapshot);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_update_elements_rmw() {
        let path = temp_db_path("elements_rmw");
        let store = open_store(&path);
        let id = seeded_project(&store, "alice");

        store.put_elements(id, r#"[{"id":"a"}]"#).unwrap();
        store
            .update_elements(id, |current| {
                assert_eq!(current, r#"[{"id":"a"}]"#);
                Ok(r#"[{"id":"a"},{"id":"b"}]"#.to_owned())
            })
            .unwrap();

        assert_eq!(store.load_elements(id).unwrap(), r#"[{"id":"a"},{"id":"b"}]"#);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_update_elements_requires_project() {
        let path = temp_db_path("elements_missing");
        let store = open_store(&path);

        let result = store.update_elements(Uuid::new_v4(), |current| Ok(current.to_owned()));
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let path = temp_db_path("reopen");
        let id;
        {
            let store = open_store(&path);
            id = seeded_project(&store, "alice");
            store.claim_sequence(id, "alice", 2).unwrap();
            store.append_ops(&[op(id, 1, "a", 1), op(id, 2, "b", 1)]).unwrap();
        }

        let store = open_store(&path);
        assert_eq!(store.load_project(id).unwrap().head_seq, 2);
        assert_eq!(store.ops_since(id, 0, 100).unwrap().len(), 2);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotAuthorized;
        assert!(err.to_string().contains("access denied"));

        let err = StoreError::Database("boom".into());
        assert!(err.to_string().contains("Database error"));
    }
}

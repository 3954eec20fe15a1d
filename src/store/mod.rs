//! Durable state for the collaboration core.
//!
//! ```text
//! ┌───────────────┐   claim / append    ┌──────────────────────────────────┐
//! │ CollabService │ ──────────────────► │ ProjectStore (RocksDB)           │
//! └───────────────┘                     │                                  │
//!                                       │ CF "projects"       — records    │
//!                                       │ CF "snapshots"      — LZ4 JSON   │
//!                                       │ CF "operations"     — op log     │
//!                                       │ CF "element_latest" — conflict   │
//!                                       │                       index      │
//!                                       └──────────────────────────────────┘
//! ```
//!
//! The op log is keyed `project_id ++ seq (big-endian)` so per-project
//! ascending reads are prefix scans; the conflict index keeps the latest
//! durable `(seq, elementVer, kind)` per element and is written in the same
//! atomic batch as the append.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 3

pub mod rocks;

pub use rocks::{ElementLatest, ProjectRecord, ProjectStore, StoreConfig, StoreError};

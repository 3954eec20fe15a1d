//! # atelier-collab — Collaboration core for the Atelier drawing service
//!
//! Many clients edit a shared set of drawing elements per project and must
//! converge on the same document despite concurrent edits and reconnects.
//! Conflicts are detected and rejected, never merged: every accepted edit is
//! assigned a server sequence number from a per-project monotonic counter,
//! appended to an operation log, folded into a materialized snapshot, and
//! fanned out to the project's subscribers.
//!
//! ## Architecture
//!
//! ```text
//! ApplyOps(batch) ──► Sequence claim ──► Conflict check ──► Log append
//!                      (atomic $inc)      (per element)        │
//!                                                              ▼
//!                                                        Materializer
//!                                                       (snapshot JSON)
//!                                                              │
//!                                                              ▼
//!                     ┌────────────────── SubscriptionHub ─────┴───────┐
//!                     │  document │ ops │ cursor │ presence registries │
//!                     └──┬─────────┬────────┬──────────┬───────────────┘
//!                        ▼         ▼        ▼          ▼
//!                     Client A  Client B  Client C  Client D
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — operation and subscription payload types
//! - [`identity`] — verified user claims delivered by the transport
//! - [`store`] — RocksDB-backed project store: sequence allocator + op log
//! - [`elements`] — element snapshot with forward-apply rules
//! - [`conflict`] — optimistic-concurrency batch partitioning
//! - [`hub`] — per-project subscriber registries with bounded fan-out
//! - [`presence`] — ephemeral per-project presence map
//! - [`service`] — the collaboration service tying the pipeline together

pub mod protocol;
pub mod identity;
pub mod store;
pub mod elements;
pub mod conflict;
pub mod hub;
pub mod presence;
pub mod service;

// Re-exports for convenience
pub use protocol::{
    ApplyOpsResult, CursorUpdate, DocumentEvent, OpInput, OpKind, Operation,
    OpsEvent, PresenceStatus, ReconstructedState, RejectedOp, UserPresence,
};
pub use identity::Claims;
pub use store::{ElementLatest, ProjectRecord, ProjectStore, StoreConfig, StoreError};
pub use elements::ElementSet;
pub use hub::{HubStats, SubscriptionHub};
pub use presence::PresenceTracker;
pub use service::{CollabError, CollabService};

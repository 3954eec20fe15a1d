//! Operation and subscription payload types.
//!
//! Everything that crosses the core boundary lives here: client-submitted
//! operation inputs, sequenced operation records as persisted in the log, the
//! batch result returned to the submitter, and the four payload shapes the
//! [`crate::hub::SubscriptionHub`] delivers to subscribers.
//!
//! Element payloads and snapshots stay opaque JSON strings end to end; the
//! core only parses them where the materializer needs to key elements by id.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of element edit carried by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

impl OpKind {
    /// True for kinds that must carry a `data` payload.
    pub fn requires_data(self) -> bool {
        matches!(self, OpKind::Add | OpKind::Update)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpKind::Add => "ADD",
            OpKind::Update => "UPDATE",
            OpKind::Delete => "DELETE",
        })
    }
}

/// A client-submitted operation, before sequencing.
///
/// `client_seq` is echoed back for ack correlation; `base_seq` is the project
/// seq the client's edit was derived from; `element_ver` is the client's
/// declared post-op version of the element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpInput {
    pub client_seq: i32,
    #[serde(rename = "type")]
    pub kind: OpKind,
    pub element_id: String,
    pub element_ver: i32,
    pub base_seq: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A sequenced operation as persisted in the log. Immutable once appended.
///
/// Persisted with a positional encoding, so every field is always present on
/// the wire — `data` must not be skipped even when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Document id of the log record.
    pub id: Uuid,
    pub project_id: Uuid,
    /// Server-assigned sequence number, unique per project.
    pub seq: i64,
    pub client_seq: i32,
    /// Originating subscriber, used for self-suppression in fan-out.
    pub socket_id: String,
    #[serde(rename = "type")]
    pub kind: OpKind,
    pub element_id: String,
    pub element_ver: i32,
    pub base_seq: i32,
    pub data: Option<String>,
    /// RFC3339-nano wallclock at acceptance.
    pub timestamp: String,
}

impl Operation {
    /// Stamp a client input with its assigned seq, a fresh document id, and
    /// the acceptance timestamp.
    pub fn sequenced(project_id: Uuid, seq: i64, socket_id: &str, input: &OpInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            seq,
            client_seq: input.client_seq,
            socket_id: socket_id.to_owned(),
            kind: input.kind,
            element_id: input.element_id.clone(),
            element_ver: input.element_ver,
            base_seq: input.base_seq,
            data: input.data.clone(),
            timestamp: now_rfc3339_nanos(),
        }
    }
}

/// One rejected op within a batch, with the conflict reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedOp {
    pub client_seq: i32,
    pub element_id: String,
    pub reason: String,
}

/// Result of applying a batch of operations.
///
/// `ack` is true whenever the sequence claim succeeded, even if every op in
/// the batch was rejected. `server_seq` is the project head after the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOpsResult {
    pub ack: bool,
    pub server_seq: i64,
    pub accepted: Vec<Operation>,
    pub rejected: Vec<RejectedOp>,
}

impl ApplyOpsResult {
    /// Result for an empty batch: acknowledged, nothing claimed or written.
    pub fn empty() -> Self {
        Self {
            ack: true,
            server_seq: 0,
            accepted: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Element snapshot rebuilt at a point in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructedState {
    /// JSON array of elements in insertion order.
    pub elements: String,
    /// Seq of the last op folded in (0 if none).
    pub last_seq: i64,
    /// Timestamp of the last op folded in (empty if none).
    pub last_timestamp: String,
}

/// Presence status of a connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
}

/// One entry of the presence list delivered to presence subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub user_name: String,
    pub email: String,
    pub status: PresenceStatus,
    pub joined_at: String,
}

/// A cursor position update fanned out to cursor subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: String,
    pub user_name: String,
    /// Display color assigned by the client.
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub selected_element_ids: Vec<String>,
    pub timestamp: String,
}

/// Full element-snapshot update delivered to document subscribers.
///
/// `socket_id` is the recipient's own id: each delivered message is a fresh
/// per-subscriber record so clients can correlate echoes.
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub elements: String,
    pub socket_id: String,
}

/// Batch of accepted ops delivered to ops subscribers.
///
/// The op batch is shared between recipients; only the envelope is allocated
/// per subscriber, with `socket_id` set to the recipient's id.
#[derive(Debug, Clone)]
pub struct OpsEvent {
    pub ops: Arc<Vec<Operation>>,
    pub socket_id: String,
}

/// RFC3339 wallclock with nanosecond precision, stamped on accepted ops.
pub fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// RFC3339 wallclock at second precision, used for project `updatedAt`.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

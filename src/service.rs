//! The collaboration service: sequence claim → conflict check → log append →
//! materialization → fan-out.
//!
//! `apply_ops` is the write path. The atomic sequence claim both authorizes
//! the caller (membership predicate) and orders the batch against concurrent
//! writers; per-op conflicts are reported in the result, not as errors. A
//! failed materialization is logged and left for the reconstructor — the log
//! is the source of truth. Reads (`ops_since`, `ops_range`, `reconstruct_at`)
//! are not membership-gated.

use std::sync::Arc;

use uuid::Uuid;

use crate::conflict::{partition_batch, BatchOutcome};
use crate::elements::ElementSet;
use crate::hub::SubscriptionHub;
use crate::identity::Claims;
use crate::presence::PresenceTracker;
use crate::protocol::{
    now_rfc3339, ApplyOpsResult, CursorUpdate, OpInput, Operation, ReconstructedState,
};
use crate::store::{ProjectStore, StoreError};

/// Default page size for tail queries.
pub const DEFAULT_OPS_LIMIT: i32 = 1000;
/// Hard cap for tail queries.
pub const MAX_OPS_LIMIT: i32 = 5000;

/// Errors surfaced at the core boundary.
#[derive(Debug)]
pub enum CollabError {
    /// Malformed input; nothing was claimed or written.
    InvalidInput(String),
    /// Missing claims, or the membership predicate failed on the claim.
    Unauthorized,
    /// Storage failure. After a successful claim this leaves a gap in the
    /// log, which readers tolerate.
    Storage(StoreError),
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollabError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            CollabError::Unauthorized => write!(f, "Unauthorized"),
            CollabError::Storage(e) => write!(f, "Storage failure: {e}"),
        }
    }
}

impl std::error::Error for CollabError {}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotAuthorized => CollabError::Unauthorized,
            other => CollabError::Storage(other),
        }
    }
}

/// Extract the verified user from the request context's claims.
pub fn require_user(claims: Option<&Claims>) -> Result<&Claims, CollabError> {
    match claims {
        Some(claims) if !claims.sub.is_empty() => Ok(claims),
        _ => Err(CollabError::Unauthorized),
    }
}

/// The collaboration core behind the transport.
pub struct CollabService {
    store: Arc<ProjectStore>,
    hub: Arc<SubscriptionHub>,
    presence: Arc<PresenceTracker>,
}

impl CollabService {
    pub fn new(
        store: Arc<ProjectStore>,
        hub: Arc<SubscriptionHub>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            store,
            hub,
            presence,
        }
    }

    /// Create with a default hub and presence tracker around a store.
    pub fn with_store(store: Arc<ProjectStore>) -> Self {
        Self::new(
            store,
            Arc::new(SubscriptionHub::with_defaults()),
            Arc::new(PresenceTracker::new()),
        )
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    // ─── Write path ───────────────────────────────────────────────────

    /// Apply a batch of operations for a project.
    ///
    /// Claims a contiguous sequence range, partitions the batch into accepted
    /// and rejected ops, appends the accepted ops durably, folds them into
    /// the snapshot, and fans them out to the project's other ops
    /// subscribers. `ack` is true whenever the claim succeeded, regardless of
    /// per-op rejections.
    pub async fn apply_ops(
        &self,
        project_id: Uuid,
        socket_id: &str,
        ops: &[OpInput],
        user_id: &str,
    ) -> Result<ApplyOpsResult, CollabError> {
        if user_id.is_empty() {
            return Err(CollabError::Unauthorized);
        }
        if ops.is_empty() {
            return Ok(ApplyOpsResult::empty());
        }
        validate_batch(ops)?;

        let count = ops.len() as i64;
        let record = self.store.claim_sequence(project_id, user_id, count)?;
        let start_seq = record.head_seq - count + 1;

        let latest = self
            .store
            .latest_for_elements(project_id, ops.iter().map(|op| op.element_id.as_str()))?;

        let BatchOutcome { accepted, rejected } =
            partition_batch(project_id, socket_id, ops, start_seq, latest);

        self.store.append_ops(&accepted)?;

        if !accepted.is_empty() {
            if let Err(e) = self.materialize(project_id, &accepted) {
                log::warn!("failed to materialize ops for project {project_id}: {e}");
            }
            self.hub
                .broadcast_ops(project_id, accepted.clone(), socket_id)
                .await;
        }

        Ok(ApplyOpsResult {
            ack: true,
            server_seq: record.head_seq,
            accepted,
            rejected,
        })
    }

    /// Fold accepted ops into the project snapshot.
    fn materialize(&self, project_id: Uuid, accepted: &[Operation]) -> Result<(), StoreError> {
        self.store.update_elements(project_id, |current| {
            let mut set = ElementSet::parse(current);
            set.apply_all(accepted);
            set.to_json()
                .map_err(|e| StoreError::Serialization(e.to_string()))
        })
    }

    // ─── History queries ──────────────────────────────────────────────

    /// Ops with `seq > since_seq`, ascending. `limit` defaults to 1000 when
    /// absent or non-positive and is capped at 5000.
    pub async fn ops_since(
        &self,
        project_id: Uuid,
        since_seq: i64,
        limit: Option<i32>,
    ) -> Result<Vec<Operation>, CollabError> {
        if since_seq < 0 {
            return Err(CollabError::InvalidInput("negative sinceSeq".into()));
        }
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(MAX_OPS_LIMIT),
            _ => DEFAULT_OPS_LIMIT,
        };
        Ok(self.store.ops_since(project_id, since_seq, limit as usize)?)
    }

    /// Ops with `from_seq <= seq <= to_seq`, ascending, inclusive both ends.
    pub async fn ops_range(
        &self,
        project_id: Uuid,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<Operation>, CollabError> {
        if from_seq < 0 || to_seq < 0 {
            return Err(CollabError::InvalidInput("negative sequence bound".into()));
        }
        Ok(self.store.ops_range(project_id, from_seq, to_seq)?)
    }

    /// Rebuild the element snapshot at an arbitrary seq by forward replay
    /// from zero, using the same rules as the materializer.
    pub async fn reconstruct_at(
        &self,
        project_id: Uuid,
        seq: i64,
    ) -> Result<ReconstructedState, CollabError> {
        if seq < 0 {
            return Err(CollabError::InvalidInput("negative seq".into()));
        }

        let ops = self.store.ops_range(project_id, 1, seq)?;

        let mut set = ElementSet::new();
        let mut last_seq = 0;
        let mut last_timestamp = String::new();
        for op in &ops {
            last_seq = op.seq;
            last_timestamp = op.timestamp.clone();
            set.apply(op);
        }

        let elements = set
            .to_json()
            .map_err(|e| CollabError::Storage(StoreError::Serialization(e.to_string())))?;

        Ok(ReconstructedState {
            elements,
            last_seq,
            last_timestamp,
        })
    }

    // ─── Fan-out entry points ─────────────────────────────────────────

    /// Deliver a wholesale snapshot update to the project's document
    /// subscribers. Returns the number of subscribers reached.
    pub async fn broadcast_document(
        &self,
        project_id: Uuid,
        elements: &str,
        from_socket_id: &str,
    ) -> usize {
        self.hub
            .broadcast_document(project_id, elements, from_socket_id)
            .await
    }

    /// Fan a cursor update out to the project's cursor subscribers.
    pub async fn update_cursor(
        &self,
        project_id: Uuid,
        cursor: &CursorUpdate,
        from_socket_id: &str,
    ) -> usize {
        self.hub
            .broadcast_cursor(project_id, cursor, from_socket_id)
            .await
    }

    // ─── Connection lifecycle ─────────────────────────────────────────

    /// Register a user as present and push the updated list to presence
    /// subscribers. Called by the transport on connect.
    pub async fn join_project(&self, project_id: Uuid, claims: &Claims) {
        self.presence
            .add(
                project_id,
                &claims.sub,
                claims.display_name(),
                &claims.email,
                &now_rfc3339(),
            )
            .await;
        self.broadcast_presence(project_id).await;
    }

    /// Remove a user's presence and push the updated list. Called by the
    /// transport on disconnect.
    pub async fn leave_project(&self, project_id: Uuid, user_id: &str) {
        self.presence.remove(project_id, user_id).await;
        self.broadcast_presence(project_id).await;
    }

    /// Push the current presence list to every presence subscriber.
    pub async fn broadcast_presence(&self, project_id: Uuid) -> usize {
        let list = self.presence.list(project_id).await;
        self.hub.broadcast_presence(project_id, &list).await
    }
}

/// Reject malformed batches before any state changes.
fn validate_batch(ops: &[OpInput]) -> Result<(), CollabError> {
    for op in ops {
        if op.element_id.is_empty() {
            return Err(CollabError::InvalidInput("empty elementId".into()));
        }
        if op.base_seq < 0 {
            return Err(CollabError::InvalidInput(format!(
                "negative baseSeq for element {}",
                op.element_id
            )));
        }
        if op.kind.requires_data() && op.data.is_none() {
            return Err(CollabError::InvalidInput(format!(
                "missing data for {} on element {}",
                op.kind, op.element_id
            )));
        }
    }
    Ok(())
}

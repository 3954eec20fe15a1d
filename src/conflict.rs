//! Optimistic-concurrency conflict detection for a claimed batch.
//!
//! A batch arrives with a contiguous claimed range `[start_seq ..]`. Each op
//! is checked against the latest durable state of its element: if the element
//! moved past the op's declared base and the op does not advance the element
//! version, the op is rejected and its slot in the claimed range is simply
//! never persisted (sparse log). Accepted ops update an in-memory latest map
//! so later ops in the same batch see them.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::{OpInput, Operation, RejectedOp};
use crate::store::ElementLatest;

/// Accepted and rejected halves of a partitioned batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<Operation>,
    pub rejected: Vec<RejectedOp>,
}

/// Partition a claimed batch into accepted operations and rejections.
///
/// `latest` holds the per-element latest durable `(seq, elementVer, kind)`
/// for every element referenced by the batch; elements never edited before
/// are simply absent. Ops are processed in input order, the op at index `i`
/// targeting `start_seq + i`.
pub fn partition_batch(
    project_id: Uuid,
    socket_id: &str,
    ops: &[OpInput],
    start_seq: i64,
    mut latest: HashMap<String, ElementLatest>,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (i, op) in ops.iter().enumerate() {
        let seq = start_seq + i as i64;

        if let Some(last) = latest.get(&op.element_id) {
            if last.seq > i64::from(op.base_seq) && op.element_ver <= last.element_ver {
                outcome.rejected.push(RejectedOp {
                    client_seq: op.client_seq,
                    element_id: op.element_id.clone(),
                    reason: format!(
                        "element modified at seq {} (ver {}), your base was seq {} (ver {})",
                        last.seq, last.element_ver, op.base_seq, op.element_ver
                    ),
                });
                continue;
            }
        }

        let record = Operation::sequenced(project_id, seq, socket_id, op);
        latest.insert(
            op.element_id.clone(),
            ElementLatest {
                seq,
                element_ver: op.element_ver,
                kind: op.kind,
            },
        );
        outcome.accepted.push(record);
    }

    outcome
}

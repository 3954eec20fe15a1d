//! Per-project subscriber registries with bounded fan-out.
//!
//! Four independent registries keyed by project: **document** (full snapshot
//! updates), **ops** (accepted op batches), **cursor** (position updates),
//! and **presence** (full presence lists). Each subscriber owns a bounded
//! mpsc receiver; broadcasts hold the registry in shared mode and use
//! non-blocking sends, so a slow consumer can never stall other subscribers
//! or the writer:
//!
//! | class    | self-suppress | on full sink        |
//! |----------|---------------|---------------------|
//! | document | yes           | warn, drop          |
//! | ops      | yes           | warn, drop          |
//! | cursor   | yes           | silent drop         |
//! | presence | no            | silent drop         |
//!
//! Unsubscribing takes exclusive mode, removes the entry, and drops the
//! sender — the only close the channel ever sees. Empty project entries are
//! garbage-collected on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::{CursorUpdate, DocumentEvent, Operation, OpsEvent, UserPresence};

/// Default per-subscriber sink capacity.
pub const DEFAULT_SINK_CAPACITY: usize = 64;

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Atomic fan-out stats — never a lock on the send path.
#[derive(Default)]
struct AtomicHubStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct DocumentSubscriber {
    socket_id: String,
    tx: mpsc::Sender<DocumentEvent>,
}

struct OpsSubscriber {
    socket_id: String,
    user_id: String,
    user_name: String,
    tx: mpsc::Sender<OpsEvent>,
}

struct CursorSubscriber {
    socket_id: String,
    tx: mpsc::Sender<CursorUpdate>,
}

struct PresenceSubscriber {
    socket_id: String,
    tx: mpsc::Sender<Vec<UserPresence>>,
}

/// An ops subscriber's connection metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsPeer {
    pub socket_id: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Default)]
struct Registries {
    document: HashMap<Uuid, Vec<DocumentSubscriber>>,
    ops: HashMap<Uuid, Vec<OpsSubscriber>>,
    cursor: HashMap<Uuid, Vec<CursorSubscriber>>,
    presence: HashMap<Uuid, Vec<PresenceSubscriber>>,
}

/// The subscription hub.
pub struct SubscriptionHub {
    registries: RwLock<Registries>,
    sink_capacity: usize,
    stats: AtomicHubStats,
}

/// Generate an 8-digit decimal socket id in `[10000000, 99999999]`.
fn random_socket_id() -> String {
    let n = (Uuid::new_v4().as_u128() % 90_000_000) + 10_000_000;
    n.to_string()
}

/// Pick a socket id not already present in the project's subscriber list.
fn fresh_socket_id<F>(taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut socket_id = random_socket_id();
    while taken(&socket_id) {
        socket_id = random_socket_id();
    }
    socket_id
}

impl SubscriptionHub {
    /// Create a hub with the given per-subscriber sink capacity.
    pub fn new(sink_capacity: usize) -> Self {
        Self {
            registries: RwLock::new(Registries::default()),
            sink_capacity,
            stats: AtomicHubStats::default(),
        }
    }

    /// Create with the default sink capacity.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }

    // ─── Document class ───────────────────────────────────────────────

    pub async fn subscribe_document(
        &self,
        project_id: Uuid,
    ) -> (String, mpsc::Receiver<DocumentEvent>) {
        let mut registries = self.registries.write().await;
        let list = registries.document.entry(project_id).or_default();
        let socket_id = fresh_socket_id(|id| list.iter().any(|s| s.socket_id == id));
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        list.push(DocumentSubscriber {
            socket_id: socket_id.clone(),
            tx,
        });
        (socket_id, rx)
    }

    pub async fn unsubscribe_document(&self, project_id: Uuid, socket_id: &str) {
        let mut registries = self.registries.write().await;
        if let Some(list) = registries.document.get_mut(&project_id) {
            if let Some(pos) = list.iter().position(|s| s.socket_id == socket_id) {
                list.remove(pos);
            }
            if list.is_empty() {
                registries.document.remove(&project_id);
            }
        }
    }

    /// Deliver a full-snapshot update to every document subscriber except the
    /// sender. Returns the number of subscribers the message reached.
    pub async fn broadcast_document(
        &self,
        project_id: Uuid,
        elements: &str,
        from_socket_id: &str,
    ) -> usize {
        let registries = self.registries.read().await;
        let mut delivered = 0;
        if let Some(list) = registries.document.get(&project_id) {
            for subscriber in list {
                if subscriber.socket_id == from_socket_id {
                    continue;
                }
                let event = DocumentEvent {
                    elements: elements.to_owned(),
                    socket_id: subscriber.socket_id.clone(),
                };
                match subscriber.tx.try_send(event) {
                    Ok(()) => {
                        delivered += 1;
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "dropped document update for subscriber {} on project {} (channel full)",
                            subscriber.socket_id,
                            project_id
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        delivered
    }

    // ─── Ops class ────────────────────────────────────────────────────

    pub async fn subscribe_ops(
        &self,
        project_id: Uuid,
        user_id: &str,
        user_name: &str,
    ) -> (String, mpsc::Receiver<OpsEvent>) {
        let mut registries = self.registries.write().await;
        let list = registries.ops.entry(project_id).or_default();
        let socket_id = fresh_socket_id(|id| list.iter().any(|s| s.socket_id == id));
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        list.push(OpsSubscriber {
            socket_id: socket_id.clone(),
            user_id: user_id.to_owned(),
            user_name: user_name.to_owned(),
            tx,
        });
        (socket_id, rx)
    }

    pub async fn unsubscribe_ops(&self, project_id: Uuid, socket_id: &str) {
        let mut registries = self.registries.write().await;
        if let Some(list) = registries.ops.get_mut(&project_id) {
            if let Some(pos) = list.iter().position(|s| s.socket_id == socket_id) {
                list.remove(pos);
            }
            if list.is_empty() {
                registries.ops.remove(&project_id);
            }
        }
    }

    /// Deliver a batch of accepted ops to every ops subscriber except the
    /// sender. The batch is shared; only the envelope is per-recipient.
    pub async fn broadcast_ops(
        &self,
        project_id: Uuid,
        ops: Vec<Operation>,
        from_socket_id: &str,
    ) -> usize {
        let ops = Arc::new(ops);
        let registries = self.registries.read().await;
        let mut delivered = 0;
        if let Some(list) = registries.ops.get(&project_id) {
            for subscriber in list {
                if subscriber.socket_id == from_socket_id {
                    continue;
                }
                let event = OpsEvent {
                    ops: ops.clone(),
                    socket_id: subscriber.socket_id.clone(),
                };
                match subscriber.tx.try_send(event) {
                    Ok(()) => {
                        delivered += 1;
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "dropped ops for subscriber {} on project {} (channel full)",
                            subscriber.socket_id,
                            project_id
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        delivered
    }

    /// Connection metadata of the project's ops subscribers.
    pub async fn ops_peers(&self, project_id: Uuid) -> Vec<OpsPeer> {
        let registries = self.registries.read().await;
        registries
            .ops
            .get(&project_id)
            .map(|list| {
                list.iter()
                    .map(|s| OpsPeer {
                        socket_id: s.socket_id.clone(),
                        user_id: s.user_id.clone(),
                        user_name: s.user_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ─── Cursor class ─────────────────────────────────────────────────

    pub async fn subscribe_cursor(
        &self,
        project_id: Uuid,
    ) -> (String, mpsc::Receiver<CursorUpdate>) {
        let mut registries = self.registries.write().await;
        let list = registries.cursor.entry(project_id).or_default();
        let socket_id = fresh_socket_id(|id| list.iter().any(|s| s.socket_id == id));
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        list.push(CursorSubscriber {
            socket_id: socket_id.clone(),
            tx,
        });
        (socket_id, rx)
    }

    pub async fn unsubscribe_cursor(&self, project_id: Uuid, socket_id: &str) {
        let mut registries = self.registries.write().await;
        if let Some(list) = registries.cursor.get_mut(&project_id) {
            if let Some(pos) = list.iter().position(|s| s.socket_id == socket_id) {
                list.remove(pos);
            }
            if list.is_empty() {
                registries.cursor.remove(&project_id);
            }
        }
    }

    /// Deliver a cursor update to every cursor subscriber except the sender.
    /// Cursor updates are ephemeral: overflow drops are silent.
    pub async fn broadcast_cursor(
        &self,
        project_id: Uuid,
        cursor: &CursorUpdate,
        from_socket_id: &str,
    ) -> usize {
        let registries = self.registries.read().await;
        let mut delivered = 0;
        if let Some(list) = registries.cursor.get(&project_id) {
            for subscriber in list {
                if subscriber.socket_id == from_socket_id {
                    continue;
                }
                match subscriber.tx.try_send(cursor.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        delivered
    }

    // ─── Presence class ───────────────────────────────────────────────

    pub async fn subscribe_presence(
        &self,
        project_id: Uuid,
    ) -> (String, mpsc::Receiver<Vec<UserPresence>>) {
        let mut registries = self.registries.write().await;
        let list = registries.presence.entry(project_id).or_default();
        let socket_id = fresh_socket_id(|id| list.iter().any(|s| s.socket_id == id));
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        list.push(PresenceSubscriber {
            socket_id: socket_id.clone(),
            tx,
        });
        (socket_id, rx)
    }

    pub async fn unsubscribe_presence(&self, project_id: Uuid, socket_id: &str) {
        let mut registries = self.registries.write().await;
        if let Some(list) = registries.presence.get_mut(&project_id) {
            if let Some(pos) = list.iter().position(|s| s.socket_id == socket_id) {
                list.remove(pos);
            }
            if list.is_empty() {
                registries.presence.remove(&project_id);
            }
        }
    }

    /// Deliver the full presence list to every presence subscriber, each
    /// getting its own copy. No self-suppression; silent drops.
    pub async fn broadcast_presence(&self, project_id: Uuid, list: &[UserPresence]) -> usize {
        let registries = self.registries.read().await;
        let mut delivered = 0;
        if let Some(subscribers) = registries.presence.get(&project_id) {
            for subscriber in subscribers {
                match subscriber.tx.try_send(list.to_vec()) {
                    Ok(()) => {
                        delivered += 1;
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        delivered
    }

    // ─── Introspection ────────────────────────────────────────────────

    pub async fn document_subscriber_count(&self, project_id: Uuid) -> usize {
        self.registries
            .read()
            .await
            .document
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    pub async fn ops_subscriber_count(&self, project_id: Uuid) -> usize {
        self.registries
            .read()
            .await
            .ops
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    pub async fn cursor_subscriber_count(&self, project_id: Uuid) -> usize {
        self.registries
            .read()
            .await
            .cursor
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    pub async fn presence_subscriber_count(&self, project_id: Uuid) -> usize {
        self.registries
            .read()
            .await
            .presence
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    /// Fan-out statistics (lock-free snapshot).
    pub fn stats(&self) -> HubStats {
        HubStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    /// The per-subscriber sink capacity.
    pub fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }
}

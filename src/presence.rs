//! Ephemeral per-project presence.
//!
//! Tracks which users are currently connected to which project. Entries live
//! only in memory: a user leaving or a process restart destroys them. The
//! connection lifecycle drives the map — join and leave are each followed by
//! a presence broadcast through the hub, which snapshots the list first so
//! the tracker lock and the hub lock are never held together.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::{PresenceStatus, UserPresence};

/// Presence entry for one `(project, user)` pair.
#[derive(Debug, Clone, PartialEq)]
struct PresenceInfo {
    user_id: String,
    user_name: String,
    email: String,
    joined_at: String,
    status: PresenceStatus,
}

/// Per-project set of active users with join metadata.
#[derive(Default)]
pub struct PresenceTracker {
    projects: RwLock<HashMap<Uuid, HashMap<String, PresenceInfo>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the entry for `(project, user)` with status
    /// Active. A rejoin with a different name replaces the old entry.
    pub async fn add(
        &self,
        project_id: Uuid,
        user_id: &str,
        user_name: &str,
        email: &str,
        joined_at: &str,
    ) {
        let mut projects = self.projects.write().await;
        projects.entry(project_id).or_default().insert(
            user_id.to_owned(),
            PresenceInfo {
                user_id: user_id.to_owned(),
                user_name: user_name.to_owned(),
                email: email.to_owned(),
                joined_at: joined_at.to_owned(),
                status: PresenceStatus::Active,
            },
        );
    }

    /// Remove the entry and garbage-collect the project map when it empties.
    /// Removing an absent user is a no-op.
    pub async fn remove(&self, project_id: Uuid, user_id: &str) {
        let mut projects = self.projects.write().await;
        if let Some(users) = projects.get_mut(&project_id) {
            users.remove(user_id);
            if users.is_empty() {
                projects.remove(&project_id);
            }
        }
    }

    /// Set the status of an existing entry. Unknown users are ignored.
    pub async fn set_status(&self, project_id: Uuid, user_id: &str, status: PresenceStatus) {
        let mut projects = self.projects.write().await;
        if let Some(info) = projects
            .get_mut(&project_id)
            .and_then(|users| users.get_mut(user_id))
        {
            info.status = status;
        }
    }

    /// Snapshot of the project's presence list. Order is unspecified.
    pub async fn list(&self, project_id: Uuid) -> Vec<UserPresence> {
        let projects = self.projects.read().await;
        projects
            .get(&project_id)
            .map(|users| {
                users
                    .values()
                    .map(|info| UserPresence {
                        user_id: info.user_id.clone(),
                        user_name: info.user_name.clone(),
                        email: info.email.clone(),
                        status: info.status,
                        joined_at: info.joined_at.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of users present in a project.
    pub async fn user_count(&self, project_id: Uuid) -> usize {
        self.projects
            .read()
            .await
            .get(&project_id)
            .map_or(0, HashMap::len)
    }

    /// Number of projects with at least one present user.
    pub async fn project_count(&self) -> usize {
        self.projects.read().await.len()
    }
}

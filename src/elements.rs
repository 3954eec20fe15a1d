//! Element snapshot with forward-apply rules.
//!
//! The snapshot is a JSON array of element objects in insertion order. The
//! same rules drive both the incremental materializer and point-in-time
//! reconstruction, so the two always agree:
//!
//! - `ADD`/`UPDATE` with a payload upsert the element, appending to the order
//!   on first sight. An `ADD` for an existing id overwrites, which keeps
//!   replay idempotent.
//! - `DELETE` soft-marks the element with `isDeleted: true` and leaves it in
//!   the order. Deleting an unknown element is a no-op.
//!
//! Payloads that fail to parse as JSON objects are skipped; the log remains
//! the source of truth and a later reconstruction sees the same result.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::protocol::{OpKind, Operation};

/// Insertion-ordered set of element records keyed by element id.
#[derive(Debug, Clone, Default)]
pub struct ElementSet {
    entries: HashMap<String, Map<String, Value>>,
    order: Vec<String>,
}

impl ElementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a snapshot string. Entries without a string `id` field are
    /// dropped; a malformed snapshot yields the empty set.
    pub fn parse(snapshot: &str) -> Self {
        let mut set = Self::new();
        let parsed: Vec<Map<String, Value>> = match serde_json::from_str(snapshot) {
            Ok(elements) => elements,
            Err(_) => return set,
        };
        for element in parsed {
            let id = match element.get("id").and_then(Value::as_str) {
                Some(id) => id.to_owned(),
                None => continue,
            };
            if !set.entries.contains_key(&id) {
                set.order.push(id.clone());
            }
            set.entries.insert(id, element);
        }
        set
    }

    /// Forward-apply a single operation.
    pub fn apply(&mut self, op: &Operation) {
        match op.kind {
            OpKind::Add | OpKind::Update => {
                let data = match op.data.as_deref() {
                    Some(data) => data,
                    None => return,
                };
                let element: Map<String, Value> = match serde_json::from_str(data) {
                    Ok(element) => element,
                    Err(_) => return,
                };
                if !self.entries.contains_key(&op.element_id) {
                    self.order.push(op.element_id.clone());
                }
                self.entries.insert(op.element_id.clone(), element);
            }
            OpKind::Delete => {
                if let Some(element) = self.entries.get_mut(&op.element_id) {
                    element.insert("isDeleted".to_owned(), Value::Bool(true));
                }
            }
        }
    }

    /// Forward-apply a batch in order.
    pub fn apply_all<'a>(&mut self, ops: impl IntoIterator<Item = &'a Operation>) {
        for op in ops {
            self.apply(op);
        }
    }

    /// Serialize to the snapshot string: a JSON array in insertion order.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let elements: Vec<&Map<String, Value>> = self
            .order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .collect();
        serde_json::to_string(&elements)
    }

    pub fn get(&self, element_id: &str) -> Option<&Map<String, Value>> {
        self.entries.get(element_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Element ids in insertion order.
    pub fn order(&self) -> &[String] {
        &self.order
    }
}

//! The baton: typed inter-step artifact flow.
//!
//! An append-only ordered map from role-derived keys to opaque JSON values.
//! The orchestrator writes `<role>` on step success, and `<role>_gate` /
//! `<role>_artifacts` whenever a gate is applied. Keys are never removed
//! within a run, and the baton is never persisted across runs.
//!
//! Concurrency contract: workers in a parallel phase each receive a by-value
//! snapshot taken at phase entry; the runner reconciles their writes after
//! the phase settles. The baton itself needs no synchronization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Baton {
    // preserve_order keeps iteration in append order
    entries: serde_json::Map<String, Value>,
}

impl Baton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a key. Re-writing an existing key (a retried gate verdict)
    /// replaces the value in place; keys are never removed.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// By-value snapshot handed to each worker at a parallel phase boundary.
    pub fn snapshot(&self) -> Baton {
        self.clone()
    }

    /// Apply a batch of writes (used when reconciling a settled phase).
    pub fn apply(&mut self, writes: Vec<(String, Value)>) {
        for (key, value) in writes {
            self.insert(key, value);
        }
    }
}

//! Core data model.
//!
//! The scheduler document is the only shared mutable state between workers.
//! It holds the turn flag, the rotation pointer and the ordered registry.

pub mod item;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Server identity
// ---------------------------------------------------------------------------

/// Externally assigned worker identity. Never generated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// The shared scheduler document.
///
/// Field names match the stored JSON. Every field defaults, so a document
/// that only carries `servers` (written by an early registration) still
/// deserializes into an idle state pointing at the head of the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulerState {
    /// True while a worker holds the turn.
    #[serde(rename = "is_running", default)]
    pub running: bool,

    /// Index into `servers` of whoever runs next.
    #[serde(rename = "next_server_index", default)]
    pub pointer_index: usize,

    /// Set together with `running`; epoch when never run.
    #[serde(
        rename = "last_run_started_at",
        default,
        with = "chrono::serde::ts_milliseconds"
    )]
    pub run_started_at: DateTime<Utc>,

    /// Registered workers, insertion order is rotation order.
    #[serde(default)]
    pub servers: Vec<ServerId>,
}

impl SchedulerState {
    /// Fresh idle state with a single registrant.
    pub fn new(initiator: ServerId) -> Self {
        Self {
            running: false,
            pointer_index: 0,
            run_started_at: DateTime::<Utc>::default(),
            servers: vec![initiator],
        }
    }

    pub fn contains(&self, id: &ServerId) -> bool {
        self.servers.contains(id)
    }

    /// Whether the current holder has kept the turn longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if !self.running {
            return false;
        }
        match TimeDelta::from_std(timeout) {
            Ok(limit) => now.signed_duration_since(self.run_started_at) > limit,
            Err(_) => false,
        }
    }

    /// Whether the rotation has stalled: idle, with no run started within
    /// `timeout`. A stale lock that was just cleared counts as overdue.
    pub fn is_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.running {
            return false;
        }
        match TimeDelta::from_std(timeout) {
            Ok(limit) => now.signed_duration_since(self.run_started_at) > limit,
            Err(_) => false,
        }
    }

    /// Rotation slot of `id`.
    pub fn position(&self, id: &ServerId) -> Option<usize> {
        self.servers.iter().position(|s| s == id)
    }

    /// Pull the pointer back to the head if the registry shrank under it.
    pub fn repair_pointer(&mut self) {
        if self.pointer_index >= self.servers.len() {
            self.pointer_index = 0;
        }
    }

    /// The worker entitled to the next turn, if any are registered.
    pub fn next_server(&self) -> Option<&ServerId> {
        self.servers.get(self.pointer_index)
    }
}

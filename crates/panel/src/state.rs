//! Derived state owned by a panel controller.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use odd_protocol::{Envelope, ErrorKind, TabId};
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the panel is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Disconnected,
    /// A connect probe was accepted; waiting for the page's `connect`.
    Connecting,
    Connected,
}

/// User-facing connection error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ConnectionError {
    #[error("debug mode is off")]
    DebugModeOff,
    /// Full display text, e.g. `Could not connect: <message>`.
    #[error("{0}")]
    EvalFailed(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DebugModeOff => ErrorKind::DebugModeOff,
            Self::EvalFailed(_) => ErrorKind::EvalFailed,
        }
    }
}

/// Connection status as rendered by the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub tab_id: TabId,
    pub connected: bool,
    pub phase: LinkPhase,
    pub error: Option<ConnectionError>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One recorded `session` / `fileSystem` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Arrival order, unique for the panel's lifetime (survives clears).
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub namespace: Option<String>,
    pub envelope: Envelope,
}

/// Which entries `clear_messages` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearFilter {
    All,
    Namespace(String),
}

impl ClearFilter {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        match self {
            Self::All => true,
            Self::Namespace(ns) => entry.namespace.as_deref() == Some(ns.as_str()),
        }
    }
}

impl From<&str> for ClearFilter {
    fn from(raw: &str) -> Self {
        if raw == "*" {
            Self::All
        } else {
            Self::Namespace(raw.to_string())
        }
    }
}

impl FromStr for ClearFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for ClearFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// Append-only log of data envelopes for the panel's lifetime.
#[derive(Debug, Default)]
pub struct MessageHistory {
    entries: Vec<HistoryEntry>,
    next_seq: u64,
    /// `0` = unbounded.
    limit: usize,
}

impl MessageHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            limit,
        }
    }

    pub fn push(&mut self, envelope: Envelope) -> &HistoryEntry {
        let entry = HistoryEntry {
            seq: self.next_seq,
            received_at: Utc::now(),
            namespace: envelope.namespace().map(str::to_string),
            envelope,
        };
        self.next_seq += 1;
        self.entries.push(entry);

        if self.limit > 0 && self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        &self.entries[self.entries.len() - 1]
    }

    /// Remove matching entries; returns how many went.
    pub fn clear(&mut self, filter: &ClearFilter) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !filter.matches(e));
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Namespace registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceEntry {
    pub namespace: String,
    pub version: String,
}

/// Applications seen on the page, one entry per namespace, listed in
/// first-seen order.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    entries: Vec<NamespaceEntry>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `namespace` (last write wins).
    /// Returns `true` when anything changed.
    pub fn upsert(&mut self, namespace: &str, version: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.namespace == namespace) {
            Some(existing) if existing.version == version => false,
            Some(existing) => {
                existing.version = version.to_string();
                true
            }
            None => {
                self.entries.push(NamespaceEntry {
                    namespace: namespace.to_string(),
                    version: version.to_string(),
                });
                true
            }
        }
    }

    pub fn get(&self, namespace: &str) -> Option<&NamespaceEntry> {
        self.entries.iter().find(|e| e.namespace == namespace)
    }

    pub fn entries(&self) -> &[NamespaceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

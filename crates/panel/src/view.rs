//! Callbacks into the panel's view layer.

use crate::state::{ConnectionState, HistoryEntry, NamespaceEntry};

/// Receives the controller's derived state after every change.
///
/// Called outside the controller's locks, so implementations may read the
/// controller back.
pub trait PanelView: Send + Sync {
    fn update_connection(&self, state: &ConnectionState);
    fn update_messages(&self, messages: &[HistoryEntry]);
    fn update_namespaces(&self, namespaces: &[NamespaceEntry]);
}

/// View that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopView;

impl PanelView for NoopView {
    fn update_connection(&self, _state: &ConnectionState) {}
    fn update_messages(&self, _messages: &[HistoryEntry]) {}
    fn update_namespaces(&self, _namespaces: &[NamespaceEntry]) {}
}

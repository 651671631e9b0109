//! In-memory registry of live channels, one per `(role, tab)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use odd_protocol::{ChannelName, ChannelRole, TabId};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::port::PortSender;

/// A registered channel.
pub struct ChannelEntry {
    pub name: ChannelName,
    /// Monotonic registration counter; a newer registration under the same
    /// name always has a larger generation.
    pub generation: u64,
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    /// Relay → endpoint direction of the channel.
    pub sender: PortSender,
    /// Stops this channel's reader loop once superseded.
    pub cancel: CancellationToken,
}

/// Summary info for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub role: ChannelRole,
    pub tab_id: TabId,
    pub generation: u64,
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe map of live channels.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelName, ChannelEntry>>,
    next_generation: AtomicU64,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Register a channel, replacing any existing one with the same name
    /// (page navigation, panel reopen).  The replaced channel is not closed,
    /// only its reader loop is told to stop.
    ///
    /// Returns the new entry's generation.
    pub fn register(&self, sender: PortSender, cancel: CancellationToken) -> u64 {
        let name = sender.name();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let connection_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            channel = %name,
            generation,
            connection_id = %connection_id,
            "channel registered"
        );

        let entry = ChannelEntry {
            name,
            generation,
            connection_id,
            connected_at: Utc::now(),
            sender,
            cancel,
        };

        if let Some(prev) = self.channels.write().insert(name, entry) {
            tracing::debug!(
                channel = %name,
                superseded_generation = prev.generation,
                "channel superseded"
            );
            prev.cancel.cancel();
        }
        generation
    }

    /// Remove the channel only if `generation` is still the live one, so a
    /// late hang-up from a replaced channel cannot evict its successor.
    pub fn remove_if_current(&self, name: &ChannelName, generation: u64) -> bool {
        let mut channels = self.channels.write();
        match channels.get(name) {
            Some(entry) if entry.generation == generation => {
                channels.remove(name);
                tracing::info!(channel = %name, generation, "channel removed");
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, name: &ChannelName, generation: u64) -> bool {
        self.channels
            .read()
            .get(name)
            .is_some_and(|e| e.generation == generation)
    }

    /// Get the sender for a specific channel.
    pub fn get_sender(&self, name: &ChannelName) -> Option<PortSender> {
        self.channels.read().get(name).map(|e| e.sender.clone())
    }

    /// Tabs that currently have a panel channel, sorted.
    pub fn panel_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .channels
            .read()
            .keys()
            .filter(|n| n.role == ChannelRole::Panel)
            .map(|n| n.tab_id)
            .collect();
        tabs.sort();
        tabs
    }

    /// List all live channels, sorted by name.
    pub fn list(&self) -> Vec<ChannelInfo> {
        let mut out: Vec<ChannelInfo> = self
            .channels
            .read()
            .values()
            .map(|e| ChannelInfo {
                name: e.name.to_string(),
                role: e.name.role,
                tab_id: e.name.tab_id,
                generation: e.generation,
                connection_id: e.connection_id.clone(),
                connected_at: e.connected_at,
            })
            .collect();
        out.sort_by(|a, b| (a.role, a.tab_id).cmp(&(b.role, b.tab_id)));
        out
    }

    /// Cancel every reader loop and forget all channels.
    pub fn clear(&self) {
        let mut channels = self.channels.write();
        for entry in channels.values() {
            entry.cancel.cancel();
        }
        let count = channels.len();
        channels.clear();
        if count > 0 {
            tracing::info!(count, "cleared all channels");
        }
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;

    fn sender(name: ChannelName) -> (PortSender, Port) {
        let (relay_end, endpoint) = Port::pair(name);
        (relay_end.sender(), endpoint)
    }

    #[test]
    fn register_replaces_duplicate() {
        let reg = ChannelRegistry::new();
        let name = ChannelName::panel(TabId(7));
        let (tx1, _p1) = sender(name);
        let (tx2, _p2) = sender(name);
        let first_cancel = CancellationToken::new();

        let g1 = reg.register(tx1, first_cancel.clone());
        let g2 = reg.register(tx2.clone(), CancellationToken::new());

        assert!(g2 > g1);
        assert_eq!(reg.len(), 1);
        assert!(first_cancel.is_cancelled());
        assert!(reg.get_sender(&name).unwrap().same_channel(&tx2));
    }

    #[test]
    fn stale_remove_keeps_newer_entry() {
        let reg = ChannelRegistry::new();
        let name = ChannelName::content(TabId(2));
        let (tx1, _p1) = sender(name);
        let (tx2, _p2) = sender(name);
        let g1 = reg.register(tx1, CancellationToken::new());
        let g2 = reg.register(tx2, CancellationToken::new());

        assert!(!reg.remove_if_current(&name, g1));
        assert!(reg.is_current(&name, g2));
        assert!(reg.remove_if_current(&name, g2));
        assert!(reg.is_empty());
    }

    #[test]
    fn roles_are_keyed_separately() {
        let reg = ChannelRegistry::new();
        let (panel, _p1) = sender(ChannelName::panel(TabId(4)));
        let (content, _p2) = sender(ChannelName::content(TabId(4)));
        let (other_panel, _p3) = sender(ChannelName::panel(TabId(1)));
        reg.register(panel, CancellationToken::new());
        reg.register(content, CancellationToken::new());
        reg.register(other_panel, CancellationToken::new());

        assert_eq!(reg.len(), 3);
        assert_eq!(reg.panel_tabs(), vec![TabId(1), TabId(4)]);
        let names: Vec<String> = reg.list().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["devtools-panel:1", "devtools-panel:4", "content-script:4"]
        );
    }

    #[test]
    fn clear_cancels_readers() {
        let reg = ChannelRegistry::new();
        let (tx, _p) = sender(ChannelName::panel(TabId(9)));
        let cancel = CancellationToken::new();
        reg.register(tx, cancel.clone());
        reg.clear();
        assert!(cancel.is_cancelled());
        assert!(reg.is_empty());
    }
}

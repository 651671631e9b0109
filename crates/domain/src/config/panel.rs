use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Panel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// How long after a `pageload` the page may take to re-register before
    /// the panel reports debug mode as off.
    #[serde(default = "d_pageload_grace_ms")]
    pub pageload_grace_ms: u64,
    /// Maximum retained history entries; oldest are dropped first.
    /// `0` keeps everything for the panel's lifetime.
    #[serde(default)]
    pub history_limit: usize,
    /// Send a disconnect probe when the panel is hidden.
    #[serde(default)]
    pub disconnect_on_hide: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            pageload_grace_ms: d_pageload_grace_ms(),
            history_limit: 0,
            disconnect_on_hide: false,
        }
    }
}

impl PanelConfig {
    pub fn pageload_grace(&self) -> Duration {
        Duration::from_millis(self.pageload_grace_ms)
    }
}

fn d_pageload_grace_ms() -> u64 {
    1000
}

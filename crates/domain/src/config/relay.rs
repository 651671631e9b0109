use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Stable identifier the page runtime registers as a listener.
    #[serde(default = "d_extension_id")]
    pub extension_id: String,
    /// Observer script the relay asks the browser to load into a tab.
    #[serde(default = "d_observer_script")]
    pub observer_script: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            extension_id: d_extension_id(),
            observer_script: d_observer_script(),
        }
    }
}

fn d_extension_id() -> String {
    "odd-devtools".into()
}

fn d_observer_script() -> String {
    "/src/content/content.js".into()
}

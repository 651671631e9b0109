use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured logging configuration.
///
/// `RUST_LOG` always wins over `default_filter` when it is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `"compact"` (human-readable, stderr) or `"json"` (one object per line).
    #[serde(default = "d_log_format")]
    pub log_format: String,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "d_default_filter")]
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: d_log_format(),
            default_filter: d_default_filter(),
        }
    }
}

impl ObservabilityConfig {
    pub fn is_json(&self) -> bool {
        self.log_format == "json"
    }
}

fn d_log_format() -> String {
    "compact".into()
}

fn d_default_filter() -> String {
    "info,odd_relay=debug,odd_panel=debug".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

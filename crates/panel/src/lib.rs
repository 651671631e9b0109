//! `odd-panel`: the devtools panel's side of the relay.
//!
//! One [`PanelController`] per open panel (one per inspected tab).  It opens
//! the `devtools-panel:<tab>` channel, asks the relay to inject the page
//! observer, probes the page's instrumented runtime through a
//! [`PageBridge`], and folds incoming envelopes into three stores that the
//! view renders through [`PanelView`]:
//!
//! - [`ConnectionState`]: connected flag, phase and the user-facing error
//! - [`MessageHistory`]: `session` / `fileSystem` events in arrival order
//! - [`NamespaceRegistry`]: one `{namespace, version}` per application
//!
//! # Connection flow
//!
//! 1. `open()`: channel → `inject` → `connect()` probe
//! 2. The probe only proves the page accepted the call; `connected` flips
//!    when the page's own `connect` envelope arrives
//! 3. `pageload`: disconnected, and debug mode is reported off unless the
//!    page re-registers within the grace period
//! 4. `ready`: the observer restarted after navigation, re-inject and probe

pub mod bridge;
pub mod builder;
pub mod controller;
pub mod state;
pub mod view;

pub use bridge::{BridgeError, PageBridge};
pub use builder::PanelControllerBuilder;
pub use controller::{PanelController, PanelSnapshot};
pub use state::{
    ClearFilter, ConnectionError, ConnectionState, HistoryEntry, LinkPhase, MessageHistory,
    NamespaceEntry, NamespaceRegistry,
};
pub use view::{NoopView, PanelView};

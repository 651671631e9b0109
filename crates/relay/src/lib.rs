//! `odd-relay`: the privileged relay between devtools panels and page observers.
//!
//! The relay owns one channel pair per inspected tab:
//!
//! ```text
//!   PanelController ──devtools-panel:<tab>──┐
//!                                           ├── Relay ── ObserverInjector
//!   PageObserver ────content-script:<tab>───┘
//! ```
//!
//! # Routing rules
//!
//! - panel `inject`  → ask the [`ObserverInjector`] to load the observer into the tab
//! - panel `counter` → forward verbatim to the same tab's content channel
//! - content *       → forward verbatim to the same tab's panel channel
//! - anything else   → dropped and logged
//!
//! Delivery is **at-most-once**: a forward to a missing or superseded
//! channel is a silent no-op and nothing is queued for later.  Panels
//! recover from gaps through the page's `ready` envelope.

pub mod inject;
pub mod port;
pub mod registry;
pub mod router;

pub use inject::{InjectError, ObserverInjector};
pub use port::{ChannelOpener, Port, PortReceiver, PortSender};
pub use registry::{ChannelInfo, ChannelRegistry};
pub use router::{DropReason, Relay, RouteOutcome};

pub use odd_protocol::{ChannelName, ChannelRole, Envelope, EnvelopeKind, TabId};

//! Relay protocol: envelope types, channel naming, and the page bridge contract.
//!
//! Three isolated contexts (devtools panel, relay, page observer) exchange
//! [`Envelope`]s over named in-process channels.  The relay only ever reads
//! an envelope's `type` and `tabId`; everything else is an opaque payload
//! flattened beside them on the wire:
//!
//! ```text
//! { "type": "connect", "state": { "app": { "namespace": "app.example" }, "odd": { "version": "1.0" } } }
//! { "type": "counter", "tabId": 5, "count": 3 }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tabs & channel names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Browser tab identifier of the inspected page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TabId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Which side of a tab's channel pair an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    /// The devtools panel controller for the tab.
    Panel,
    /// The observer injected into the inspected page.
    Content,
}

impl ChannelRole {
    /// Prefix used in the channel's wire name.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Panel => "devtools-panel",
            Self::Content => "content-script",
        }
    }

    /// The role on the other end of a relayed pair.
    pub fn counterpart(&self) -> Self {
        match self {
            Self::Panel => Self::Content,
            Self::Content => Self::Panel,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Name a channel is opened under: role plus tab.  The relay keys its
/// routing table on this pair and keeps only the newest channel per name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName {
    pub role: ChannelRole,
    pub tab_id: TabId,
}

impl ChannelName {
    pub fn panel(tab_id: TabId) -> Self {
        Self { role: ChannelRole::Panel, tab_id }
    }

    pub fn content(tab_id: TabId) -> Self {
        Self { role: ChannelRole::Content, tab_id }
    }

    /// Name of the channel this one is paired with for the same tab.
    pub fn counterpart(&self) -> Self {
        Self {
            role: self.role.counterpart(),
            tab_id: self.tab_id,
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.tab_id)
    }
}

/// Failure to parse a channel wire name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelNameError {
    #[error("channel name missing ':' separator: {0}")]
    MissingSeparator(String),
    #[error("unknown channel role: {0}")]
    UnknownRole(String),
    #[error("invalid tab id: {0}")]
    InvalidTabId(String),
}

impl FromStr for ChannelName {
    type Err = ChannelNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, tab) = s
            .rsplit_once(':')
            .ok_or_else(|| ChannelNameError::MissingSeparator(s.to_string()))?;
        let role = match role {
            "devtools-panel" => ChannelRole::Panel,
            "content-script" => ChannelRole::Content,
            other => return Err(ChannelNameError::UnknownRole(other.to_string())),
        };
        let tab_id = tab
            .parse::<u32>()
            .map_err(|_| ChannelNameError::InvalidTabId(tab.to_string()))?;
        Ok(Self {
            role,
            tab_id: TabId(tab_id),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Envelope discriminator (`type` on the wire).
///
/// Unrecognised strings decode to [`EnvelopeKind::Unknown`] and encode back
/// unchanged, so newer page observers can talk to older panels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    /// Panel → relay: inject the observer into `tabId`.
    Inject,
    /// Panel → relay → page: opaque control passthrough.
    Counter,
    /// Page → panel: the SDK registered this relay as a listener.
    Connect,
    /// Page → panel: the SDK dropped this relay as a listener.
    Disconnect,
    /// Page → panel: session state-machine event.
    Session,
    /// Page → panel: file system event.
    FileSystem,
    /// Page → panel: the inspected page (re)loaded.
    Pageload,
    /// Page → panel: the observer just started in the page.
    Ready,
    Unknown(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inject => "inject",
            Self::Counter => "counter",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Session => "session",
            Self::FileSystem => "fileSystem",
            Self::Pageload => "pageload",
            Self::Ready => "ready",
            Self::Unknown(raw) => raw,
        }
    }

    /// Kinds recorded in the panel's message history.
    pub fn is_history(&self) -> bool {
        matches!(self, Self::Session | Self::FileSystem)
    }
}

impl From<String> for EnvelopeKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "inject" => Self::Inject,
            "counter" => Self::Counter,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "session" => Self::Session,
            "fileSystem" => Self::FileSystem,
            "pageload" => Self::Pageload,
            "ready" => Self::Ready,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of relay traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    /// Everything else on the wire object, untouched by the relay.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            tab_id: None,
            payload: Map::new(),
        }
    }

    pub fn inject(tab_id: TabId) -> Self {
        Self::new(EnvelopeKind::Inject).with_tab(tab_id)
    }

    pub fn counter(tab_id: TabId, payload: Map<String, Value>) -> Self {
        Self {
            kind: EnvelopeKind::Counter,
            tab_id: Some(tab_id),
            payload,
        }
    }

    pub fn ready() -> Self {
        Self::new(EnvelopeKind::Ready)
    }

    pub fn pageload() -> Self {
        Self::new(EnvelopeKind::Pageload)
    }

    pub fn disconnect() -> Self {
        Self::new(EnvelopeKind::Disconnect)
    }

    /// A `connect` status envelope carrying the SDK snapshot under `state`.
    pub fn connect(snapshot: &ConnectSnapshot) -> Self {
        let mut env = Self::new(EnvelopeKind::Connect);
        if let Ok(state) = serde_json::to_value(snapshot) {
            env.payload.insert("state".into(), state);
        }
        env
    }

    pub fn with_tab(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Decode the `state` snapshot of a `connect` envelope.
    pub fn connect_snapshot(&self) -> Option<ConnectSnapshot> {
        let state = self.payload.get("state")?;
        serde_json::from_value(state.clone()).ok()
    }

    /// Application namespace the envelope is about (`state.app.namespace`).
    pub fn namespace(&self) -> Option<&str> {
        self.payload
            .get("state")?
            .get("app")?
            .get("namespace")?
            .as_str()
    }
}

/// Snapshot carried by a `connect` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSnapshot {
    pub app: AppInfo,
    pub odd: OddInfo,
}

impl ConnectSnapshot {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            app: AppInfo {
                namespace: namespace.into(),
            },
            odd: OddInfo {
                version: version.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OddInfo {
    pub version: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Page bridge contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Method exposed by the page's instrumented global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeMethod {
    /// Register the extension as an event listener.
    Connect,
    /// Unregister the extension.
    Disconnect,
}

impl fmt::Display for BridgeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// Parameterised call evaluated inside the inspected page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCall {
    pub method: BridgeMethod,
    #[serde(rename = "extensionId")]
    pub extension_id: String,
}

impl BridgeCall {
    pub fn connect(extension_id: impl Into<String>) -> Self {
        Self {
            method: BridgeMethod::Connect,
            extension_id: extension_id.into(),
        }
    }

    pub fn disconnect(extension_id: impl Into<String>) -> Self {
        Self {
            method: BridgeMethod::Disconnect,
            extension_id: extension_id.into(),
        }
    }
}

/// Result of a bridge call that executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeOutcome {
    /// The instrumented global exists and accepted the call.
    Registered,
    /// The page has no instrumented global (debug mode off).
    NotPresent,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error categories shared by the relay and the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The page has no instrumented runtime to connect to.
    DebugModeOff,
    /// The page-eval bridge itself failed.
    EvalFailed,
    /// No destination channel; logged, never shown to the user.
    UnroutedMessage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DebugModeOff => f.write_str("debug_mode_off"),
            Self::EvalFailed => f.write_str("eval_failed"),
            Self::UnroutedMessage => f.write_str("unrouted_message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_name_wire_format() {
        let name = ChannelName::panel(TabId(7));
        assert_eq!(name.to_string(), "devtools-panel:7");
        assert_eq!("content-script:12".parse::<ChannelName>().unwrap(), ChannelName::content(TabId(12)));
        assert_eq!(name.counterpart(), ChannelName::content(TabId(7)));
    }

    #[test]
    fn channel_name_rejects_garbage() {
        assert!(matches!(
            "devtools-panel".parse::<ChannelName>(),
            Err(ChannelNameError::MissingSeparator(_))
        ));
        assert!(matches!(
            "sidebar:1".parse::<ChannelName>(),
            Err(ChannelNameError::UnknownRole(_))
        ));
        assert!(matches!(
            "content-script:abc".parse::<ChannelName>(),
            Err(ChannelNameError::InvalidTabId(_))
        ));
    }

    #[test]
    fn connect_envelope_parses_snapshot() {
        let raw = json!({
            "type": "connect",
            "state": { "app": { "namespace": "app.example" }, "odd": { "version": "1.0" } }
        });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Connect);
        assert_eq!(env.tab_id, None);
        assert_eq!(env.namespace(), Some("app.example"));
        assert_eq!(
            env.connect_snapshot(),
            Some(ConnectSnapshot::new("app.example", "1.0"))
        );
    }

    #[test]
    fn counter_payload_is_passed_through() {
        let raw = json!({ "type": "counter", "tabId": 5, "count": 3, "nested": { "a": [1, 2] } });
        let env: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Counter);
        assert_eq!(env.tab_id, Some(TabId(5)));
        assert_eq!(env.payload.len(), 2);
        assert_eq!(serde_json::to_value(&env).unwrap(), raw);
    }

    #[test]
    fn unknown_kind_survives_reencoding() {
        let env: Envelope = serde_json::from_value(json!({ "type": "telemetry", "x": 1 })).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Unknown("telemetry".into()));
        assert_eq!(serde_json::to_value(&env).unwrap()["type"], "telemetry");
    }

    #[test]
    fn file_system_kind_uses_camel_case() {
        let env: Envelope = serde_json::from_value(json!({ "type": "fileSystem" })).unwrap();
        assert!(env.kind.is_history());
        assert!(!EnvelopeKind::Pageload.is_history());
    }

    #[test]
    fn bridge_call_serialization() {
        let call = BridgeCall::connect("abc123");
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({ "method": "connect", "extensionId": "abc123" })
        );
    }
}

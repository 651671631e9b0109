//! Panel controller: owns the panel channel and the derived stores.

use std::sync::{Arc, Weak};

use odd_domain::config::PanelConfig;
use odd_domain::{Error, Result};
use odd_protocol::{
    BridgeCall, BridgeMethod, BridgeOutcome, ChannelName, Envelope, EnvelopeKind, TabId,
};
use odd_relay::{ChannelOpener, Port, PortReceiver, PortSender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::bridge::{BridgeError, PageBridge};
use crate::state::{
    ClearFilter, ConnectionError, ConnectionState, HistoryEntry, LinkPhase, MessageHistory,
    NamespaceEntry, NamespaceRegistry,
};
use crate::view::PanelView;

/// Everything the view can render, captured at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub connection: ConnectionState,
    pub messages: Vec<HistoryEntry>,
    pub namespaces: Vec<NamespaceEntry>,
}

struct PanelState {
    connection: ConnectionState,
    history: MessageHistory,
    namespaces: NamespaceRegistry,
}

impl PanelState {
    /// An error always leaves the panel disconnected.
    fn set_error(&mut self, error: ConnectionError) {
        self.connection.error = Some(error);
        self.connection.connected = false;
        self.connection.phase = LinkPhase::Disconnected;
    }
}

/// Controller for one devtools panel, bound to one inspected tab.
///
/// Built with [`PanelControllerBuilder`](crate::PanelControllerBuilder) and
/// always held in an `Arc`: the channel reader and the pageload timer keep
/// only weak references back to it.
pub struct PanelController {
    tab_id: TabId,
    extension_id: String,
    config: PanelConfig,
    opener: Arc<dyn ChannelOpener>,
    bridge: Arc<dyn PageBridge>,
    view: Arc<dyn PanelView>,
    state: Mutex<PanelState>,
    outbound: RwLock<Option<PortSender>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pageload_timers: Mutex<Vec<JoinHandle<()>>>,
}

impl PanelController {
    pub(crate) fn new(
        tab_id: TabId,
        extension_id: String,
        config: PanelConfig,
        opener: Arc<dyn ChannelOpener>,
        bridge: Arc<dyn PageBridge>,
        view: Arc<dyn PanelView>,
    ) -> Self {
        let history = MessageHistory::new(config.history_limit);
        Self {
            tab_id,
            extension_id,
            config,
            opener,
            bridge,
            view,
            state: Mutex::new(PanelState {
                connection: ConnectionState {
                    tab_id,
                    connected: false,
                    phase: LinkPhase::Disconnected,
                    error: None,
                },
                history,
                namespaces: NamespaceRegistry::new(),
            }),
            outbound: RwLock::new(None),
            reader: Mutex::new(None),
            pageload_timers: Mutex::new(Vec::new()),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn channel_name(&self) -> ChannelName {
        ChannelName::panel(self.tab_id)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Channel
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Open the panel channel, ask for the observer, then probe the page.
    pub async fn open(self: &Arc<Self>) -> Result<()> {
        let port = self.opener.open(self.channel_name());
        self.adopt_channel(port)?;
        tracing::info!(tab_id = %self.tab_id, "panel opened");

        self.send_inject()?;
        self.connect().await;
        Ok(())
    }

    /// Take over `port` as the panel channel.  The previous inbound handler
    /// is aborted and outbound traffic moves to the new channel.
    pub fn adopt_channel(self: &Arc<Self>, port: Port) -> Result<()> {
        let name = port.name();
        if name != self.channel_name() {
            return Err(Error::Other(format!(
                "channel {name} does not belong to panel {}",
                self.channel_name()
            )));
        }

        let (sender, receiver) = port.split();
        *self.outbound.write() = Some(sender.clone());

        let handle = tokio::spawn(read_loop(Arc::downgrade(self), sender, receiver));
        if let Some(prev) = self.reader.lock().replace(handle) {
            tracing::debug!(channel = %name, "replacing inbound handler");
            prev.abort();
        }
        Ok(())
    }

    /// Forget `sender` as the outbound channel unless another channel has
    /// been adopted since.
    fn release_channel(&self, sender: &PortSender) {
        let mut outbound = self.outbound.write();
        if outbound.as_ref().is_some_and(|current| current.same_channel(sender)) {
            *outbound = None;
            tracing::info!(tab_id = %self.tab_id, channel = %sender.name(), "panel channel hung up");
        }
    }

    fn post(&self, envelope: Envelope) -> Result<()> {
        let sender = self
            .outbound
            .read()
            .clone()
            .ok_or_else(|| Error::NotConnected(self.channel_name().to_string()))?;
        sender.post(envelope)
    }

    /// Ask the relay to (re)inject the page observer into this tab.
    pub fn send_inject(&self) -> Result<()> {
        tracing::debug!(tab_id = %self.tab_id, "requesting observer injection");
        self.post(Envelope::inject(self.tab_id))
    }

    /// Pass a `counter` control message through to the page.
    pub fn send_counter(&self, payload: Map<String, Value>) -> Result<()> {
        self.post(Envelope::counter(self.tab_id, payload))
    }

    /// Stop the inbound handler and any pending timers and drop the channel.
    pub fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        for timer in self.pageload_timers.lock().drain(..) {
            timer.abort();
        }
        if self.outbound.write().take().is_some() {
            tracing::info!(tab_id = %self.tab_id, "panel closed");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Page probes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Ask the page's runtime to register with the extension.
    ///
    /// Success only means the page accepted the call; `connected` waits for
    /// the page's `connect` envelope.
    pub async fn connect(&self) {
        let call = BridgeCall::connect(self.extension_id.as_str());
        let result = self.bridge.call(&call).await;
        self.apply_probe(BridgeMethod::Connect, result);
    }

    /// Ask the page's runtime to unregister from the extension.
    pub async fn disconnect(&self) {
        let call = BridgeCall::disconnect(self.extension_id.as_str());
        let result = self.bridge.call(&call).await;
        self.apply_probe(BridgeMethod::Disconnect, result);
    }

    fn apply_probe(&self, method: BridgeMethod, result: std::result::Result<BridgeOutcome, BridgeError>) {
        let connection = {
            let mut st = self.state.lock();
            match result {
                Ok(BridgeOutcome::Registered) => {
                    tracing::debug!(tab_id = %self.tab_id, method = %method, "probe accepted");
                    st.connection.error = None;
                    if method == BridgeMethod::Connect && st.connection.phase != LinkPhase::Connected {
                        st.connection.phase = LinkPhase::Connecting;
                    }
                }
                Ok(BridgeOutcome::NotPresent) => {
                    tracing::info!(tab_id = %self.tab_id, method = %method, "page runtime not present");
                    st.set_error(ConnectionError::DebugModeOff);
                }
                Err(e) => {
                    tracing::warn!(tab_id = %self.tab_id, method = %method, error = %e, "probe failed");
                    st.set_error(ConnectionError::EvalFailed(format!("Could not {method}: {e}")));
                }
            }
            st.connection.clone()
        };
        self.view.update_connection(&connection);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Inbound
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Fold one envelope from the page into the panel's state.
    pub async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        let kind = envelope.kind.clone();
        match kind {
            EnvelopeKind::Connect => self.on_page_connect(&envelope),
            EnvelopeKind::Disconnect => self.on_page_disconnect(),
            EnvelopeKind::Pageload => self.on_pageload(),
            EnvelopeKind::Ready => {
                tracing::debug!(tab_id = %self.tab_id, "observer ready");
                if let Err(e) = self.send_inject() {
                    tracing::warn!(tab_id = %self.tab_id, error = %e, "re-inject failed");
                }
                self.connect().await;
            }
            kind if kind.is_history() => self.record(envelope),
            other => {
                tracing::debug!(tab_id = %self.tab_id, kind = %other, "ignoring envelope");
            }
        }
    }

    fn on_page_connect(&self, envelope: &Envelope) {
        let snapshot = envelope.connect_snapshot();
        let (connection, namespaces) = {
            let mut st = self.state.lock();
            let changed = match &snapshot {
                Some(s) => st.namespaces.upsert(&s.app.namespace, &s.odd.version),
                None => false,
            };
            st.connection.connected = true;
            st.connection.phase = LinkPhase::Connected;
            st.connection.error = None;
            let namespaces = changed.then(|| st.namespaces.entries().to_vec());
            (st.connection.clone(), namespaces)
        };

        match &snapshot {
            Some(s) => tracing::info!(
                tab_id = %self.tab_id,
                namespace = %s.app.namespace,
                version = %s.odd.version,
                "page connected"
            ),
            None => tracing::warn!(tab_id = %self.tab_id, "connect without app snapshot"),
        }

        self.view.update_connection(&connection);
        if let Some(namespaces) = namespaces {
            self.view.update_namespaces(&namespaces);
        }
    }

    fn on_page_disconnect(&self) {
        let connection = {
            let mut st = self.state.lock();
            st.connection.connected = false;
            st.connection.phase = LinkPhase::Disconnected;
            st.connection.clone()
        };
        tracing::info!(tab_id = %self.tab_id, "page disconnected");
        self.view.update_connection(&connection);
    }

    fn record(&self, envelope: Envelope) {
        let messages = {
            let mut st = self.state.lock();
            let entry = st.history.push(envelope);
            tracing::trace!(tab_id = %self.tab_id, seq = entry.seq, kind = %entry.envelope.kind, "recorded");
            st.history.entries().to_vec()
        };
        self.view.update_messages(&messages);
    }

    fn on_pageload(self: &Arc<Self>) {
        let connection = {
            let mut st = self.state.lock();
            st.connection.connected = false;
            st.connection.phase = LinkPhase::Disconnected;
            st.connection.clone()
        };
        tracing::info!(tab_id = %self.tab_id, "page reloaded");
        self.view.update_connection(&connection);

        let weak = Arc::downgrade(self);
        let grace = self.config.pageload_grace();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(panel) = weak.upgrade() {
                panel.on_pageload_grace_elapsed();
            }
        });
        // Each pageload keeps its own timer; the check at fire time decides.
        let mut timers = self.pageload_timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.push(timer);
    }

    fn on_pageload_grace_elapsed(&self) {
        let connection = {
            let mut st = self.state.lock();
            if st.connection.connected {
                return;
            }
            st.set_error(ConnectionError::DebugModeOff);
            st.connection.clone()
        };
        tracing::info!(tab_id = %self.tab_id, "no connect after reload, debug mode off");
        self.view.update_connection(&connection);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // View hooks
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn on_shown(&self) {
        tracing::debug!(tab_id = %self.tab_id, "panel shown");
        self.connect().await;
    }

    pub async fn on_hidden(&self) {
        tracing::debug!(tab_id = %self.tab_id, "panel hidden");
        if self.config.disconnect_on_hide {
            self.disconnect().await;
        }
    }

    /// Remove history entries.  `"*"` clears everything, anything else is
    /// taken as a namespace.  Returns how many entries were removed.
    pub fn clear_messages(&self, filter: impl Into<ClearFilter>) -> usize {
        let filter = filter.into();
        let (removed, messages) = {
            let mut st = self.state.lock();
            let removed = st.history.clear(&filter);
            (removed, st.history.entries().to_vec())
        };
        tracing::debug!(tab_id = %self.tab_id, filter = %filter, removed, "cleared messages");
        self.view.update_messages(&messages);
        removed
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connection.connected
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let st = self.state.lock();
        PanelSnapshot {
            connection: st.connection.clone(),
            messages: st.history.entries().to_vec(),
            namespaces: st.namespaces.entries().to_vec(),
        }
    }
}

impl Drop for PanelController {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        for timer in self.pageload_timers.get_mut().drain(..) {
            timer.abort();
        }
    }
}

async fn read_loop(panel: Weak<PanelController>, sender: PortSender, mut receiver: PortReceiver) {
    while let Some(envelope) = receiver.recv().await {
        let Some(panel) = panel.upgrade() else {
            break;
        };
        panel.handle_envelope(envelope).await;
    }
    if let Some(panel) = panel.upgrade() {
        panel.release_channel(&sender);
    }
    tracing::debug!(channel = %sender.name(), "panel reader stopped");
}

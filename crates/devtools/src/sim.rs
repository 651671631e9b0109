//! In-process stand-ins for the browser: tabs, the page's instrumented
//! runtime, and script injection.
//!
//! Injection starts a [`PageObserver`] in the tab; reloading a tab emits
//! `pageload`, tears the observer down and starts a fresh one, as the
//! content script does on navigation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use odd_domain::config::RelayConfig;
use odd_domain::{Error, Result};
use odd_observer::PageObserver;
use odd_panel::{BridgeError, ConnectionState, HistoryEntry, NamespaceEntry, PageBridge, PanelView};
use odd_protocol::{
    BridgeCall, BridgeMethod, BridgeOutcome, ChannelName, ConnectSnapshot, Envelope, EnvelopeKind,
    TabId,
};
use odd_relay::{ChannelOpener, InjectError, ObserverInjector, Relay};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

const UNLOAD_WAIT: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Page runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The instrumented application running in a page (present only when the
/// app runs in debug mode).
#[derive(Debug, Clone)]
pub struct AppRuntime {
    pub namespace: String,
    pub version: String,
}

impl AppRuntime {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    fn snapshot(&self) -> ConnectSnapshot {
        ConnectSnapshot::new(self.namespace.clone(), self.version.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tab
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SimulatedTab {
    tab_id: TabId,
    runtime: RwLock<Option<AppRuntime>>,
    eval_failure: RwLock<Option<String>>,
    observer: Mutex<Option<Arc<PageObserver>>>,
    /// `counter` traffic the page received from the panel.
    received: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl SimulatedTab {
    fn new(tab_id: TabId, runtime: Option<AppRuntime>) -> Self {
        Self {
            tab_id,
            runtime: RwLock::new(runtime),
            eval_failure: RwLock::new(None),
            observer: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn runtime(&self) -> Option<AppRuntime> {
        self.runtime.read().clone()
    }

    /// Swap the page's application (`None` = debug mode off).
    pub fn set_runtime(&self, runtime: Option<AppRuntime>) {
        *self.runtime.write() = runtime;
    }

    /// Make every page evaluation fail with `message` until cleared.
    pub fn set_eval_failure(&self, message: Option<String>) {
        *self.eval_failure.write() = message;
    }

    /// Start the observer unless this page load already has one.
    fn inject(self: &Arc<Self>, opener: &dyn ChannelOpener) -> Result<bool> {
        let observer = self
            .observer
            .lock()
            .get_or_insert_with(|| Arc::new(PageObserver::new(self.tab_id)))
            .clone();

        let started = observer.start(opener)?;
        if started {
            if let Some(mut inbound) = observer.take_inbound() {
                let tab: Weak<SimulatedTab> = Arc::downgrade(self);
                tokio::spawn(async move {
                    while let Some(envelope) = inbound.recv().await {
                        let Some(tab) = tab.upgrade() else { break };
                        tracing::debug!(tab_id = %tab.tab_id, kind = %envelope.kind, "page received");
                        tab.received.lock().push(envelope);
                    }
                });
            }
        }
        Ok(started)
    }

    /// Send a page event through the current observer.
    pub fn emit(&self, envelope: Envelope) -> Result<()> {
        let observer = self.observer.lock().clone();
        match observer {
            Some(observer) => observer.emit(envelope),
            None => Err(Error::NotConnected(format!("no observer in tab {}", self.tab_id))),
        }
    }

    /// Emit an app data event tagged with the running app's namespace.
    pub fn emit_data(&self, kind: EnvelopeKind, detail: Value) -> Result<()> {
        let namespace = self.runtime().map(|rt| rt.namespace);
        let envelope = Envelope::new(kind)
            .with_field("state", json!({ "app": { "namespace": namespace } }))
            .with_field("detail", detail);
        self.emit(envelope)
    }

    pub fn observer_running(&self) -> bool {
        self.observer.lock().as_ref().is_some_and(|o| o.is_running())
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(observer) = self.observer.lock().take() {
            observer.stop();
        }
    }

    fn unload(&self) {
        if let Some(observer) = self.observer.lock().take() {
            if let Err(e) = observer.emit(Envelope::pageload()) {
                tracing::debug!(tab_id = %self.tab_id, error = %e, "pageload not delivered");
            }
            observer.stop();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the tabs and performs observer injection for the relay.
pub struct SimulatedBrowser {
    observer_script: String,
    relay: OnceLock<Relay>,
    tabs: RwLock<HashMap<TabId, Arc<SimulatedTab>>>,
}

impl SimulatedBrowser {
    /// Create the browser together with the relay that injects into it.
    pub fn with_relay() -> (Arc<Self>, Relay) {
        Self::with_relay_config(&RelayConfig::default())
    }

    pub fn with_relay_config(config: &RelayConfig) -> (Arc<Self>, Relay) {
        let browser = Arc::new(Self {
            observer_script: config.observer_script.clone(),
            relay: OnceLock::new(),
            tabs: RwLock::new(HashMap::new()),
        });
        let relay = Relay::new(browser.clone());
        // Freshly created, so the cell is empty.
        let _ = browser.relay.set(relay.clone());
        (browser, relay)
    }

    pub fn open_tab(&self, tab_id: TabId, runtime: Option<AppRuntime>) -> Arc<SimulatedTab> {
        let tab = Arc::new(SimulatedTab::new(tab_id, runtime));
        self.tabs.write().insert(tab_id, tab.clone());
        tracing::info!(tab_id = %tab_id, "tab opened");
        tab
    }

    pub fn tab(&self, tab_id: TabId) -> Option<Arc<SimulatedTab>> {
        self.tabs.read().get(&tab_id).cloned()
    }

    /// Close a tab: its observer stops and later page evaluations fail.
    pub fn close_tab(&self, tab_id: TabId) -> Option<Arc<SimulatedTab>> {
        let tab = self.tabs.write().remove(&tab_id)?;
        tab.close();
        tracing::info!(tab_id = %tab_id, "tab closed");
        Some(tab)
    }

    /// Navigate: `pageload` from the old page, then the content script of
    /// the new page starts and announces `ready`.
    ///
    /// The new content channel is opened only after the relay has drained
    /// and dropped the old one, so the `pageload` is not superseded.
    pub async fn reload(&self, tab_id: TabId) -> Result<()> {
        let tab = self
            .tab(tab_id)
            .ok_or_else(|| Error::Other(format!("no tab {tab_id}")))?;
        let relay = self.relay()?;
        tab.unload();

        let old = ChannelName::content(tab_id);
        let drained = tokio::time::timeout(UNLOAD_WAIT, async {
            while relay.has_channel(&old) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(tab_id = %tab_id, "old content channel still registered");
        }

        tracing::info!(tab_id = %tab_id, "tab reloaded");
        tab.inject(relay)?;
        Ok(())
    }

    fn relay(&self) -> Result<&Relay> {
        self.relay
            .get()
            .ok_or_else(|| Error::Other("browser has no relay".into()))
    }
}

#[async_trait::async_trait]
impl ObserverInjector for SimulatedBrowser {
    async fn inject(&self, tab_id: TabId) -> std::result::Result<(), InjectError> {
        let tab = self.tab(tab_id).ok_or(InjectError::TabNotFound(tab_id))?;
        let relay = self.relay().map_err(|e| InjectError::Refused(e.to_string()))?;
        let started = tab
            .inject(relay)
            .map_err(|e| InjectError::Refused(e.to_string()))?;
        if started {
            tracing::debug!(tab_id = %tab_id, script = %self.observer_script, "script executed");
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Page bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluates bridge calls against a [`SimulatedTab`]'s runtime.  A
/// successful call makes the runtime announce itself through the observer,
/// like the real global does after registering a listener.
pub struct SimulatedPageBridge {
    tab: Arc<SimulatedTab>,
}

impl SimulatedPageBridge {
    pub fn new(tab: Arc<SimulatedTab>) -> Self {
        Self { tab }
    }
}

#[async_trait::async_trait]
impl PageBridge for SimulatedPageBridge {
    async fn call(&self, call: &BridgeCall) -> std::result::Result<BridgeOutcome, BridgeError> {
        if self.tab.is_closed() {
            return Err(BridgeError::PageUnavailable);
        }
        if let Some(message) = self.tab.eval_failure.read().clone() {
            return Err(BridgeError::Eval(message));
        }
        let Some(runtime) = self.tab.runtime() else {
            return Ok(BridgeOutcome::NotPresent);
        };

        let announcement = match call.method {
            BridgeMethod::Connect => Envelope::connect(&runtime.snapshot()),
            BridgeMethod::Disconnect => Envelope::disconnect(),
        };
        // No observer means nobody hears the page, but the call still ran.
        if let Err(e) = self.tab.emit(announcement) {
            tracing::debug!(tab_id = %self.tab.tab_id, method = %call.method, error = %e, "announcement lost");
        }
        Ok(BridgeOutcome::Registered)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// View
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Panel view that logs every update.
pub struct LoggingView {
    tab_id: TabId,
}

impl LoggingView {
    pub fn new(tab_id: TabId) -> Self {
        Self { tab_id }
    }
}

impl PanelView for LoggingView {
    fn update_connection(&self, state: &ConnectionState) {
        let error = state
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".into());
        tracing::info!(
            tab_id = %self.tab_id,
            connected = state.connected,
            phase = ?state.phase,
            error = %error,
            "view: connection"
        );
    }

    fn update_messages(&self, messages: &[HistoryEntry]) {
        tracing::info!(tab_id = %self.tab_id, count = messages.len(), "view: messages");
    }

    fn update_namespaces(&self, namespaces: &[NamespaceEntry]) {
        let listed: Vec<String> = namespaces
            .iter()
            .map(|n| format!("{}@{}", n.namespace, n.version))
            .collect();
        tracing::info!(tab_id = %self.tab_id, namespaces = ?listed, "view: namespaces");
    }
}

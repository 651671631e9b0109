//! `odd-observer`: the observer injected into an inspected page.
//!
//! The relay re-injects on every `inject` request, so [`PageObserver::start`]
//! is idempotent: only the first call opens the content channel and
//! announces `ready`.  Everything the page runtime emits afterwards is
//! forwarded as-is.

use odd_domain::{Error, Result};
use odd_protocol::{ChannelName, Envelope, TabId};
use odd_relay::{ChannelOpener, PortReceiver, PortSender};
use parking_lot::Mutex;

/// Observer for one page load of one tab.
pub struct PageObserver {
    tab_id: TabId,
    state: Mutex<ObserverState>,
}

#[derive(Default)]
struct ObserverState {
    sender: Option<PortSender>,
    inbound: Option<PortReceiver>,
}

impl PageObserver {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            state: Mutex::new(ObserverState::default()),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Open the content channel and announce `ready`.
    ///
    /// Returns `false` without side effects when already running.
    pub fn start(&self, opener: &dyn ChannelOpener) -> Result<bool> {
        let mut state = self.state.lock();
        if state.sender.is_some() {
            tracing::debug!(tab_id = %self.tab_id, "observer already running");
            return Ok(false);
        }

        let port = opener.open(ChannelName::content(self.tab_id));
        let (sender, inbound) = port.split();
        sender.post(Envelope::ready())?;
        state.sender = Some(sender);
        state.inbound = Some(inbound);
        tracing::info!(tab_id = %self.tab_id, "observer started");
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Forward one page event to the relay.
    pub fn emit(&self, envelope: Envelope) -> Result<()> {
        let state = self.state.lock();
        let Some(sender) = state.sender.as_ref() else {
            tracing::warn!(tab_id = %self.tab_id, kind = %envelope.kind, "observer not started, dropping event");
            return Err(Error::NotConnected(ChannelName::content(self.tab_id).to_string()));
        };
        sender.post(envelope)
    }

    /// Hand out the receiver for control traffic (`counter`) relayed from
    /// the panel.  Only the first call after `start` gets it.
    pub fn take_inbound(&self) -> Option<PortReceiver> {
        self.state.lock().inbound.take()
    }

    /// Tear down the channel, as happens when the page navigates away.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.sender.take().is_some() {
            state.inbound = None;
            tracing::info!(tab_id = %self.tab_id, "observer stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use odd_protocol::{ConnectSnapshot, EnvelopeKind};
    use odd_relay::{InjectError, ObserverInjector, Relay};

    struct NoInjector;

    #[async_trait::async_trait]
    impl ObserverInjector for NoInjector {
        async fn inject(&self, _tab_id: TabId) -> std::result::Result<(), InjectError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let relay = Relay::new(Arc::new(NoInjector));
        let mut panel = relay.connect(ChannelName::panel(TabId(3)));
        let observer = PageObserver::new(TabId(3));

        assert!(observer.start(&relay).unwrap());
        assert!(!observer.start(&relay).unwrap());
        assert!(observer.is_running());

        assert_eq!(panel.recv().await.unwrap().kind, EnvelopeKind::Ready);
        observer.emit(Envelope::pageload()).unwrap();
        // Exactly one ready: the next thing through is the pageload.
        assert_eq!(panel.recv().await.unwrap().kind, EnvelopeKind::Pageload);
    }

    #[tokio::test]
    async fn emit_forwards_page_events_verbatim() {
        let relay = Relay::new(Arc::new(NoInjector));
        let mut panel = relay.connect(ChannelName::panel(TabId(8)));
        let observer = PageObserver::new(TabId(8));
        observer.start(&relay).unwrap();
        let _ready = panel.recv().await;

        let connect = Envelope::connect(&ConnectSnapshot::new("app.example", "1.0"));
        observer.emit(connect.clone()).unwrap();
        assert_eq!(panel.recv().await.unwrap(), connect);
    }

    #[test]
    fn emit_before_start_fails() {
        let observer = PageObserver::new(TabId(1));
        assert!(observer.emit(Envelope::ready()).is_err());
        assert!(observer.take_inbound().is_none());
    }

    #[tokio::test]
    async fn counter_reaches_observer_inbound() {
        let relay = Relay::new(Arc::new(NoInjector));
        let observer = PageObserver::new(TabId(5));
        observer.start(&relay).unwrap();
        let mut inbound = observer.take_inbound().unwrap();

        let mut payload = serde_json::Map::new();
        payload.insert("count".into(), serde_json::json!(2));
        let counter = Envelope::counter(TabId(5), payload);
        let outcome = relay.on_message(ChannelName::panel(TabId(5)), counter.clone()).await;
        assert!(outcome.is_forwarded());
        assert_eq!(inbound.recv().await.unwrap(), counter);
    }

    #[tokio::test]
    async fn stop_allows_fresh_start() {
        let relay = Relay::new(Arc::new(NoInjector));
        let observer = PageObserver::new(TabId(2));
        observer.start(&relay).unwrap();
        observer.stop();
        assert!(!observer.is_running());
        assert!(observer.start(&relay).unwrap());
    }
}

//! Relay router: registers channels and forwards envelopes between the
//! panel and content channel of each tab.
//!
//! Routing rules:
//! 1. Panel `inject` → [`ObserverInjector::inject`] for the envelope's tab
//!    (falling back to the channel's tab).
//! 2. Panel `counter` → content channel of the same tab, verbatim.
//! 3. Content anything → panel channel of the channel's tab, verbatim.
//! 4. One-shot runtime messages → see [`Relay::on_runtime_message`].
//! 5. Otherwise → dropped.

use std::sync::Arc;

use odd_protocol::{ChannelName, ChannelRole, Envelope, EnvelopeKind, ErrorKind, TabId};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::inject::ObserverInjector;
use crate::port::{ChannelOpener, Port, PortReceiver};
use crate::registry::{ChannelInfo, ChannelRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the relay did with one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The observer was (re)injected into the tab.
    Injected { tab_id: TabId },
    /// Forwarded verbatim to a live channel.
    Forwarded { to: String },
    /// Not delivered; never surfaced to the user.
    Dropped { reason: DropReason },
}

impl RouteOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// No channel registered under the destination name.
    NoChannel { channel: String },
    /// The destination's endpoint went away before the send.
    ChannelClosed { channel: String },
    /// The envelope type is not routable from its origin.
    UnexpectedKind { kind: String },
    /// Several panels are open and nothing identifies the target tab.
    AmbiguousPanel { panels: usize },
    /// The browser refused the injection.
    InjectFailed { tab_id: TabId, error: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The relay.  Cheap to clone; all clones share one routing table.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    channels: ChannelRegistry,
    injector: Arc<dyn ObserverInjector>,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(injector: Arc<dyn ObserverInjector>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                channels: ChannelRegistry::new(),
                injector,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Accept the relay end of a freshly opened channel: register it under
    /// its name (superseding any previous channel) and start forwarding
    /// whatever the endpoint posts.
    pub fn on_connect(&self, port: Port) -> JoinHandle<()> {
        let name = port.name();
        let (sender, receiver) = port.split();
        let cancel = self.inner.shutdown.child_token();
        let generation = self.inner.channels.register(sender, cancel.clone());

        let relay = self.clone();
        tokio::spawn(async move {
            relay.read_loop(name, generation, receiver, cancel).await;
        })
    }

    /// Open a channel to this relay.  Returns the endpoint's end.
    pub fn connect(&self, name: ChannelName) -> Port {
        let (endpoint, relay_end) = Port::pair(name);
        self.on_connect(relay_end);
        endpoint
    }

    async fn read_loop(
        &self,
        name: ChannelName,
        generation: u64,
        mut receiver: PortReceiver,
        cancel: CancellationToken,
    ) {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(channel = %name, generation, "reader stopped");
                    break;
                }
                msg = receiver.recv() => match msg {
                    Some(env) => env,
                    None => {
                        tracing::info!(channel = %name, generation, "endpoint hung up");
                        break;
                    }
                },
            };
            self.on_message(name, envelope).await;
        }
        self.inner.channels.remove_if_current(&name, generation);
    }

    /// Route one envelope that arrived on the channel `origin`.
    pub async fn on_message(&self, origin: ChannelName, envelope: Envelope) -> RouteOutcome {
        match origin.role {
            ChannelRole::Panel => self.on_panel_message(origin, envelope).await,
            ChannelRole::Content => self.forward(origin.counterpart(), envelope),
        }
    }

    async fn on_panel_message(&self, origin: ChannelName, envelope: Envelope) -> RouteOutcome {
        let tab_id = envelope.tab_id.unwrap_or(origin.tab_id);
        let kind = envelope.kind.clone();
        match kind {
            EnvelopeKind::Inject => {
                tracing::debug!(tab_id = %tab_id, "injecting observer");
                match self.inner.injector.inject(tab_id).await {
                    Ok(()) => RouteOutcome::Injected { tab_id },
                    Err(e) => {
                        tracing::warn!(tab_id = %tab_id, error = %e, "observer injection failed");
                        RouteOutcome::Dropped {
                            reason: DropReason::InjectFailed {
                                tab_id,
                                error: e.to_string(),
                            },
                        }
                    }
                }
            }
            EnvelopeKind::Counter => self.forward(ChannelName::content(tab_id), envelope),
            other => {
                tracing::debug!(channel = %origin, kind = %other, "ignoring panel message");
                RouteOutcome::Dropped {
                    reason: DropReason::UnexpectedKind {
                        kind: other.to_string(),
                    },
                }
            }
        }
    }

    /// Fallback for page messages that arrive outside any channel (one-shot
    /// runtime messages).
    ///
    /// The destination panel is the first of: the sender's tab, the
    /// envelope's `tabId`, or the only registered panel.  With several panels
    /// open and no tab to go on, the message is dropped rather than guessed.
    pub fn on_runtime_message(&self, sender_tab: Option<TabId>, envelope: Envelope) -> RouteOutcome {
        if let Some(tab_id) = sender_tab.or(envelope.tab_id) {
            return self.forward(ChannelName::panel(tab_id), envelope);
        }

        let panels = self.inner.channels.panel_tabs();
        match panels.as_slice() {
            [only] => self.forward(ChannelName::panel(*only), envelope),
            _ => {
                tracing::debug!(
                    kind = %envelope.kind,
                    panels = panels.len(),
                    error_kind = %ErrorKind::UnroutedMessage,
                    "runtime message has no unambiguous panel"
                );
                RouteOutcome::Dropped {
                    reason: DropReason::AmbiguousPanel {
                        panels: panels.len(),
                    },
                }
            }
        }
    }

    fn forward(&self, to: ChannelName, envelope: Envelope) -> RouteOutcome {
        let Some(sender) = self.inner.channels.get_sender(&to) else {
            tracing::debug!(
                to = %to,
                kind = %envelope.kind,
                error_kind = %ErrorKind::UnroutedMessage,
                "no channel, dropping"
            );
            return RouteOutcome::Dropped {
                reason: DropReason::NoChannel {
                    channel: to.to_string(),
                },
            };
        };

        let kind = envelope.kind.clone();
        match sender.post(envelope) {
            Ok(()) => {
                tracing::trace!(to = %to, kind = %kind, "forwarded");
                RouteOutcome::Forwarded { to: to.to_string() }
            }
            Err(e) => {
                tracing::debug!(
                    to = %to,
                    kind = %kind,
                    error = %e,
                    error_kind = %ErrorKind::UnroutedMessage,
                    "channel closed, dropping"
                );
                RouteOutcome::Dropped {
                    reason: DropReason::ChannelClosed {
                        channel: to.to_string(),
                    },
                }
            }
        }
    }

    /// Live channels, for diagnostics.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.inner.channels.list()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn has_channel(&self, name: &ChannelName) -> bool {
        self.inner.channels.get_sender(name).is_some()
    }

    /// Stop every reader loop and drop all channels.  Endpoints see their
    /// channel close.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.channels.clear();
    }
}

impl ChannelOpener for Relay {
    fn open(&self, name: ChannelName) -> Port {
        self.connect(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::InjectError;
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    #[derive(Default)]
    struct RecordingInjector {
        calls: Mutex<Vec<TabId>>,
    }

    #[async_trait::async_trait]
    impl ObserverInjector for RecordingInjector {
        async fn inject(&self, tab_id: TabId) -> Result<(), InjectError> {
            self.calls.lock().push(tab_id);
            if tab_id == TabId(404) {
                return Err(InjectError::TabNotFound(tab_id));
            }
            Ok(())
        }
    }

    fn make_relay() -> (Arc<RecordingInjector>, Relay) {
        let injector = Arc::new(RecordingInjector::default());
        let relay = Relay::new(injector.clone());
        (injector, relay)
    }

    fn counter(tab: u32, n: i64) -> Envelope {
        let mut payload = Map::new();
        payload.insert("count".into(), json!(n));
        Envelope::counter(TabId(tab), payload)
    }

    #[tokio::test]
    async fn inject_targets_envelope_tab() {
        let (injector, relay) = make_relay();
        let outcome = relay
            .on_message(ChannelName::panel(TabId(7)), Envelope::inject(TabId(7)))
            .await;
        assert_eq!(outcome, RouteOutcome::Injected { tab_id: TabId(7) });
        assert_eq!(*injector.calls.lock(), vec![TabId(7)]);
    }

    #[tokio::test]
    async fn inject_failure_is_not_fatal() {
        let (_, relay) = make_relay();
        let outcome = relay
            .on_message(ChannelName::panel(TabId(404)), Envelope::new(EnvelopeKind::Inject))
            .await;
        assert!(matches!(
            outcome,
            RouteOutcome::Dropped { reason: DropReason::InjectFailed { tab_id: TabId(404), .. } }
        ));
    }

    #[tokio::test]
    async fn counter_reaches_only_its_tab() {
        let (_, relay) = make_relay();
        let mut content5 = relay.connect(ChannelName::content(TabId(5)));
        let mut content6 = relay.connect(ChannelName::content(TabId(6)));

        let outcome = relay.on_message(ChannelName::panel(TabId(5)), counter(5, 1)).await;
        assert!(outcome.is_forwarded());

        let got = content5.try_recv().unwrap();
        assert_eq!(got, counter(5, 1));
        assert!(content6.try_recv().is_none());
    }

    #[tokio::test]
    async fn counter_without_content_channel_is_dropped() {
        let (_, relay) = make_relay();
        let outcome = relay.on_message(ChannelName::panel(TabId(3)), counter(3, 1)).await;
        assert_eq!(
            outcome,
            RouteOutcome::Dropped {
                reason: DropReason::NoChannel {
                    channel: "content-script:3".into()
                }
            }
        );
    }

    #[tokio::test]
    async fn status_envelopes_from_panel_are_ignored() {
        let (_, relay) = make_relay();
        let _content = relay.connect(ChannelName::content(TabId(1)));
        let outcome = relay
            .on_message(ChannelName::panel(TabId(1)), Envelope::ready())
            .await;
        assert!(matches!(
            outcome,
            RouteOutcome::Dropped { reason: DropReason::UnexpectedKind { .. } }
        ));
    }

    #[tokio::test]
    async fn content_without_panel_is_dropped_then_recovers() {
        let (_, relay) = make_relay();
        let origin = ChannelName::content(TabId(9));

        let dropped = relay.on_message(origin, Envelope::ready()).await;
        assert!(!dropped.is_forwarded());

        let mut panel = relay.connect(ChannelName::panel(TabId(9)));
        let delivered = relay.on_message(origin, Envelope::pageload()).await;
        assert!(delivered.is_forwarded());
        assert_eq!(panel.try_recv().unwrap().kind, EnvelopeKind::Pageload);
        assert!(panel.try_recv().is_none());
    }

    #[tokio::test]
    async fn runtime_message_prefers_sender_tab() {
        let (_, relay) = make_relay();
        let mut p1 = relay.connect(ChannelName::panel(TabId(1)));
        let mut p2 = relay.connect(ChannelName::panel(TabId(2)));

        assert!(relay.on_runtime_message(Some(TabId(2)), Envelope::ready()).is_forwarded());
        assert!(p1.try_recv().is_none());
        assert!(p2.try_recv().is_some());

        let tagged = Envelope::pageload().with_tab(TabId(1));
        assert!(relay.on_runtime_message(None, tagged).is_forwarded());
        assert!(p1.try_recv().is_some());
    }

    #[tokio::test]
    async fn runtime_message_ambiguous_with_several_panels() {
        let (_, relay) = make_relay();
        let mut only = relay.connect(ChannelName::panel(TabId(1)));
        assert!(relay.on_runtime_message(None, Envelope::ready()).is_forwarded());
        assert!(only.try_recv().is_some());

        let _second = relay.connect(ChannelName::panel(TabId(2)));
        assert_eq!(
            relay.on_runtime_message(None, Envelope::ready()),
            RouteOutcome::Dropped {
                reason: DropReason::AmbiguousPanel { panels: 2 }
            }
        );
        assert!(only.try_recv().is_none());
    }

    #[tokio::test]
    async fn forward_to_closed_endpoint_is_dropped() {
        let (_, relay) = make_relay();
        let panel = relay.connect(ChannelName::panel(TabId(4)));
        drop(panel);
        let outcome = relay
            .on_message(ChannelName::content(TabId(4)), Envelope::ready())
            .await;
        assert!(!outcome.is_forwarded());
    }

    #[tokio::test]
    async fn shutdown_closes_endpoints() {
        let (_, relay) = make_relay();
        let mut panel = relay.connect(ChannelName::panel(TabId(1)));
        relay.shutdown();
        assert_eq!(relay.channel_count(), 0);
        assert!(panel.recv().await.is_none());
    }
}

//! Builder pattern for constructing a [`PanelController`].

use std::sync::Arc;

use odd_domain::config::PanelConfig;
use odd_domain::{Error, Result};
use odd_protocol::TabId;
use odd_relay::ChannelOpener;

use crate::bridge::PageBridge;
use crate::controller::PanelController;
use crate::view::{NoopView, PanelView};

/// Fluent builder for [`PanelController`].
///
/// # Example
///
/// ```rust,ignore
/// let panel = PanelControllerBuilder::new(TabId(7))
///     .extension_id("odd-devtools")
///     .opener(Arc::new(relay.clone()))
///     .bridge(page_bridge)
///     .view(view)
///     .build()?;
/// panel.open().await?;
/// ```
pub struct PanelControllerBuilder {
    tab_id: TabId,
    extension_id: String,
    config: PanelConfig,
    opener: Option<Arc<dyn ChannelOpener>>,
    bridge: Option<Arc<dyn PageBridge>>,
    view: Option<Arc<dyn PanelView>>,
}

impl PanelControllerBuilder {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            extension_id: "odd-devtools".into(),
            config: PanelConfig::default(),
            opener: None,
            bridge: None,
            view: None,
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Where the panel channel is opened (normally the relay).
    pub fn opener(mut self, opener: Arc<dyn ChannelOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// How connect/disconnect probes reach the inspected page.
    pub fn bridge(mut self, bridge: Arc<dyn PageBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    // ── Optional ─────────────────────────────────────────────────────

    /// Extension id passed to the page's runtime on every probe.
    pub fn extension_id(mut self, id: impl Into<String>) -> Self {
        self.extension_id = id.into();
        self
    }

    pub fn config(mut self, config: PanelConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives state updates (default: [`NoopView`]).
    pub fn view(mut self, view: Arc<dyn PanelView>) -> Self {
        self.view = Some(view);
        self
    }

    // ── Build ────────────────────────────────────────────────────────

    /// Validate and construct the controller.  Nothing is opened until
    /// [`PanelController::open`] is called.
    pub fn build(self) -> Result<Arc<PanelController>> {
        let opener = self
            .opener
            .ok_or_else(|| Error::Config("panel needs a channel opener".into()))?;
        let bridge = self
            .bridge
            .ok_or_else(|| Error::Config("panel needs a page bridge".into()))?;
        if self.extension_id.trim().is_empty() {
            return Err(Error::Config("extension_id must not be empty".into()));
        }
        let view = self.view.unwrap_or_else(|| Arc::new(NoopView));

        Ok(Arc::new(PanelController::new(
            self.tab_id,
            self.extension_id,
            self.config,
            opener,
            bridge,
            view,
        )))
    }
}

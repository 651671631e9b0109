//! Seam to the browser's script-injection primitive.

use odd_protocol::TabId;

/// Loads the page observer script into a tab.
///
/// The relay injects unconditionally on every `inject` request, so the
/// observer itself must treat a second start in the same page as a no-op.
#[async_trait::async_trait]
pub trait ObserverInjector: Send + Sync + 'static {
    async fn inject(&self, tab_id: TabId) -> Result<(), InjectError>;
}

/// Why the browser refused to inject.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InjectError {
    #[error("tab {0} not found")]
    TabNotFound(TabId),
    #[error("injection refused: {0}")]
    Refused(String),
}

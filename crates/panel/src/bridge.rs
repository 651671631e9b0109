//! Seam to the browser's inspected-page evaluation primitive.

use odd_protocol::{BridgeCall, BridgeOutcome};

/// Evaluates a [`BridgeCall`] against the inspected page's instrumented
/// global and reports whether it was there to answer.
///
/// This is the only awaited operation in the panel; callers tolerate
/// results landing out of order.
#[async_trait::async_trait]
pub trait PageBridge: Send + Sync + 'static {
    async fn call(&self, call: &BridgeCall) -> Result<BridgeOutcome, BridgeError>;
}

/// The evaluation itself failed (as opposed to the global being absent).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{0}")]
    Eval(String),
    #[error("inspected page unavailable")]
    PageUnavailable,
}

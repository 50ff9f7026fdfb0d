//! Publish Gate
//!
//! The sink handed to feeds. It forwards an update to the hub only while
//! its ticker is in the active ticker set, so a stale feed task that keeps
//! emitting after `RemoveTicker` cannot reach any session.
//!
//! The membership read guard is held across the hub publish. Delivery never
//! blocks (mailboxes use `try_send`), so a removal waits at most for the
//! in-flight fan-outs.

use crate::application::ports::PriceSink;
use crate::domain::registry::TickerSet;
use crate::domain::ticker::PriceUpdate;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;

/// [`PriceSink`] that filters feed output against the active ticker set.
#[derive(Debug, Clone)]
pub struct TrackedTickerSink {
    tickers: TickerSet,
    hub: SharedBroadcastHub,
}

impl TrackedTickerSink {
    /// Create a gate in front of `hub` reading membership from `tickers`.
    #[must_use]
    pub const fn new(tickers: TickerSet, hub: SharedBroadcastHub) -> Self {
        Self { tickers, hub }
    }
}

impl PriceSink for TrackedTickerSink {
    fn publish(&self, update: PriceUpdate) {
        let ticker = update.ticker().clone();
        let mut update = Some(update);

        // Membership is held for the whole publish so a concurrent removal
        // cannot complete between the check and the fan-out.
        let forwarded = self.tickers.with_tracked(&ticker, || {
            if let Some(update) = update.take() {
                let report = self.hub.publish(update);
                tracing::trace!(
                    ticker = %ticker,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Update published"
                );
            }
        });

        if !forwarded {
            tracing::debug!(ticker = %ticker, "Dropping update for untracked ticker");
            metrics::record_update_rejected();
        }
    }
}

//! Broadcast Hub
//!
//! Central fan-out point: every published price update is copied into the
//! mailbox of each currently subscribed session.
//!
//! # Architecture
//!
//! ```text
//!                         ┌──────────────────┐
//! PriceFeed ──► Gate ───► │   BroadcastHub   │──► mailbox ──► StreamSession 1
//!                         │ (subscriber map) │──► mailbox ──► StreamSession 2
//!                         └──────────────────┘──► mailbox ──► StreamSession N
//! ```
//!
//! # Locking
//!
//! - The subscriber table is guarded by one mutex, held only to insert,
//!   remove, or snapshot. It is never held while delivering.
//! - Each subscriber slot has its own short mutex so that detaching a
//!   subscriber and enqueueing into it cannot interleave. Once
//!   `unsubscribe` returns, nothing more reaches that mailbox.

mod gate;
mod mailbox;
mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use self::mailbox::MailboxSender;
use crate::BroadcastSettings;
use crate::application::ports::PriceSink;
use crate::domain::session::SessionId;
use crate::domain::ticker::PriceUpdate;
use crate::infrastructure::metrics;

pub use gate::TrackedTickerSink;
pub use session::{SessionError, StreamSession};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for session mailboxes.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Maximum pending updates per session (`0` = unbounded).
    ///
    /// A session whose mailbox overflows is evicted rather than allowed to
    /// stall the publisher.
    pub mailbox_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10_000,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            mailbox_capacity: settings.mailbox_capacity,
        }
    }
}

// =============================================================================
// Delivery Outcomes
// =============================================================================

/// Per-subscriber delivery failure.
///
/// Failures are isolated: they are logged and may evict the affected
/// subscriber, but never stop delivery to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    /// The session's bounded mailbox is full (slow consumer).
    #[error("mailbox full")]
    MailboxFull,
    /// The session's consumer is gone.
    #[error("mailbox closed")]
    MailboxClosed,
}

impl DeliveryFailure {
    /// Failure name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MailboxFull => "mailbox_full",
            Self::MailboxClosed => "mailbox_closed",
        }
    }
}

/// Why a subscriber stopped receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detach {
    /// Removed through `unsubscribe`.
    Unsubscribed,
    /// Removed by the hub after a delivery failure.
    Evicted(DeliveryFailure),
    /// The hub was shut down.
    HubClosed,
}

/// Result of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sessions the update was enqueued for.
    pub delivered: usize,
    /// Sessions whose delivery failed.
    pub failed: usize,
    /// Sessions that detached between snapshot and delivery.
    pub skipped: usize,
}

/// Handle identifying a subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    /// The session this handle refers to.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }
}

// =============================================================================
// Subscriber
// =============================================================================

#[derive(Debug)]
struct SubscriberSlot {
    mailbox: Option<MailboxSender>,
    detached: Option<Detach>,
}

/// Hub-side state for one session, shared with the session itself.
#[derive(Debug)]
pub(crate) struct Subscriber {
    id: SessionId,
    slot: Mutex<SubscriberSlot>,
}

impl Subscriber {
    fn new(id: SessionId, mailbox: MailboxSender) -> Self {
        Self {
            id,
            slot: Mutex::new(SubscriberSlot {
                mailbox: Some(mailbox),
                detached: None,
            }),
        }
    }

    fn detached(id: SessionId, reason: Detach) -> Self {
        Self {
            id,
            slot: Mutex::new(SubscriberSlot {
                mailbox: None,
                detached: Some(reason),
            }),
        }
    }

    /// Enqueue an update. `Ok(false)` means the subscriber already detached.
    fn deliver(&self, update: PriceUpdate) -> Result<bool, DeliveryFailure> {
        let slot = self.slot.lock();
        match &slot.mailbox {
            Some(mailbox) => mailbox.try_send(update).map(|()| true),
            None => Ok(false),
        }
    }

    /// Drop the mailbox sender. Only the first reason is kept.
    fn detach(&self, reason: Detach) -> bool {
        let mut slot = self.slot.lock();
        if slot.mailbox.take().is_some() {
            slot.detached = Some(reason);
            true
        } else {
            false
        }
    }

    /// Whether the hub still delivers to this subscriber.
    pub(crate) fn is_active(&self) -> bool {
        self.slot.lock().mailbox.is_some()
    }

    /// Why the subscriber detached, if it has.
    pub(crate) fn detach_reason(&self) -> Option<Detach> {
        self.slot.lock().detached
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central hub distributing price updates to every active session.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ticker_stream::domain::ticker::{PriceUpdate, Ticker};
/// use ticker_stream::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// # tokio_test::block_on(async {
/// let hub = Arc::new(BroadcastHub::new(BroadcastConfig::default()));
/// let mut session = hub.subscribe();
///
/// let ticker = Ticker::parse("BTCUSD").unwrap();
/// hub.publish(PriceUpdate::new(ticker, 45000.0, 1000, "BINANCE"));
///
/// let update = session.next().await.unwrap().unwrap();
/// assert_eq!(update.price(), 45000.0);
/// # });
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    subscribers: Mutex<HashMap<SessionId, Arc<Subscriber>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            subscribers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Open a new session.
    ///
    /// The session's cancellation token is a child of the hub's shutdown
    /// token, so closing the hub also cancels every session.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> StreamSession {
        self.subscribe_with_cancel(self.shutdown.child_token())
    }

    /// Open a new session that ends when `cancel` fires.
    #[must_use]
    pub fn subscribe_with_cancel(self: &Arc<Self>, cancel: CancellationToken) -> StreamSession {
        let id = SessionId::generate();
        let (tx, rx) = mailbox::channel(self.config.mailbox_capacity);

        let subscriber = {
            let mut subscribers = self.subscribers.lock();
            // Checked under the table lock so `close` cannot miss this entry.
            if self.closed.load(Ordering::Acquire) {
                Arc::new(Subscriber::detached(id, Detach::HubClosed))
            } else {
                let subscriber = Arc::new(Subscriber::new(id, tx));
                subscribers.insert(id, Arc::clone(&subscriber));
                subscriber
            }
        };

        let count = self.subscriber_count();
        metrics::set_active_sessions(count);
        tracing::debug!(session_id = %id, sessions = count, "Session subscribed");

        StreamSession::new(Arc::clone(self), subscriber, rx, cancel)
    }

    /// Release a session's registration. Idempotent.
    ///
    /// Returns `true` if this call removed the subscriber.
    pub fn unsubscribe(&self, handle: SessionHandle) -> bool {
        let removed = self.subscribers.lock().remove(&handle.id);

        let Some(subscriber) = removed else {
            return false;
        };

        subscriber.detach(Detach::Unsubscribed);

        let count = self.subscriber_count();
        metrics::set_active_sessions(count);
        tracing::debug!(session_id = %handle.id, sessions = count, "Session unsubscribed");
        true
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Enqueue an update into every active session's mailbox.
    ///
    /// The subscriber table is snapshotted under its lock and delivery runs
    /// outside it. A failed delivery evicts only the affected session.
    pub fn publish(&self, update: PriceUpdate) -> PublishReport {
        let started = Instant::now();
        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.lock().values().cloned().collect();

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_update_published();

        let mut report = PublishReport::default();

        for subscriber in &snapshot {
            match subscriber.deliver(update.clone()) {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.skipped += 1,
                Err(failure) => {
                    report.failed += 1;
                    tracing::warn!(
                        session_id = %subscriber.id,
                        ticker = %update.ticker(),
                        reason = failure.as_str(),
                        "Delivery failed, evicting session"
                    );
                    metrics::record_delivery_failure(failure);
                    self.evict(subscriber, failure);
                }
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        metrics::record_updates_delivered(report.delivered as u64);
        metrics::record_publish_duration(started.elapsed());

        report
    }

    fn evict(&self, subscriber: &Arc<Subscriber>, failure: DeliveryFailure) {
        {
            let mut subscribers = self.subscribers.lock();
            if subscribers
                .get(&subscriber.id)
                .is_some_and(|current| Arc::ptr_eq(current, subscriber))
            {
                subscribers.remove(&subscriber.id);
            }
        }
        subscriber.detach(Detach::Evicted(failure));
        metrics::set_active_sessions(self.subscriber_count());
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Detach every subscriber and cancel all sessions.
    ///
    /// Later subscriptions end immediately with [`SessionError::HubClosed`].
    pub fn close(&self) {
        let drained: Vec<Arc<Subscriber>> = {
            let mut subscribers = self.subscribers.lock();
            self.closed.store(true, Ordering::Release);
            subscribers.drain().map(|(_, s)| s).collect()
        };

        for subscriber in &drained {
            subscriber.detach(Detach::HubClosed);
        }
        self.shutdown.cancel();
        metrics::set_active_sessions(0);

        tracing::info!(sessions = drained.len(), "Broadcast hub closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Number of registered sessions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            sessions: self.subscriber_count(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl PriceSink for BroadcastHub {
    fn publish(&self, update: PriceUpdate) {
        let ticker = update.ticker().clone();
        let report = Self::publish(self, update);
        tracing::trace!(
            ticker = %ticker,
            delivered = report.delivered,
            failed = report.failed,
            "Update published"
        );
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStats {
    /// Registered sessions.
    pub sessions: usize,
    /// Publish calls.
    pub published: u64,
    /// Successful per-session enqueues.
    pub delivered: u64,
    /// Failed per-session enqueues.
    pub failed: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::domain::ticker::Ticker;

    fn update(ticker: &str, price: f64, timestamp: i64) -> PriceUpdate {
        PriceUpdate::new(Ticker::parse(ticker).unwrap(), price, timestamp, "BINANCE")
    }

    fn hub_with_capacity(mailbox_capacity: usize) -> Arc<BroadcastHub> {
        Arc::new(BroadcastHub::new(BroadcastConfig { mailbox_capacity }))
    }

    #[test]
    fn hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(!hub.is_closed());
    }

    #[test]
    fn subscriber_count_tracks_sessions() {
        let hub = Arc::new(BroadcastHub::with_defaults());

        let s1 = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        let s2 = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(s1);
        assert_eq!(hub.subscriber_count(), 1);

        drop(s2);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_session() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut s1 = hub.subscribe();
        let mut s2 = hub.subscribe();

        let report = hub.publish(update("BTCUSD", 45000.0, 1000));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        let r1 = s1.next().await.unwrap().unwrap();
        let r2 = s2.next().await.unwrap().unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1.ticker().as_str(), "BTCUSD");
    }

    #[test]
    fn publish_with_no_sessions_is_noop() {
        let hub = BroadcastHub::with_defaults();
        let report = hub.publish(update("BTCUSD", 1.0, 1));
        assert_eq!(report, PublishReport::default());
        assert_eq!(hub.stats().published, 1);
    }

    #[tokio::test]
    async fn hub_as_price_sink_fans_out() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut session = hub.subscribe();
        let sink: Arc<dyn PriceSink> = hub.clone();

        sink.publish(update("BTCUSD", 1.0, 1));
        assert_eq!(session.next().await.unwrap().unwrap().timestamp(), 1);
        assert_eq!(hub.stats().published, 1);
        assert_eq!(hub.stats().delivered, 1);
    }

    #[tokio::test]
    async fn session_sees_only_updates_after_subscribe() {
        let hub = Arc::new(BroadcastHub::with_defaults());

        hub.publish(update("BTCUSD", 1.0, 1));
        let mut session = hub.subscribe();
        hub.publish(update("BTCUSD", 2.0, 2));

        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first.price(), 2.0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut session = hub.subscribe();
        let handle = session.handle();

        hub.publish(update("BTCUSD", 1.0, 1));
        assert!(hub.unsubscribe(handle));
        assert!(!hub.unsubscribe(handle));

        let report = hub.publish(update("BTCUSD", 2.0, 2));
        assert_eq!(report.delivered, 0);

        // Update published before unsubscribe is still yielded, then the stream ends.
        assert_eq!(session.next().await.unwrap().unwrap().price(), 1.0);
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn full_mailbox_evicts_only_that_session() {
        let hub = hub_with_capacity(1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        let first = hub.publish(update("BTCUSD", 1.0, 1));
        assert_eq!(first.delivered, 2);

        // Fast consumer drains; slow one does not.
        assert_eq!(fast.next().await.unwrap().unwrap().price(), 1.0);

        let second = hub.publish(update("BTCUSD", 2.0, 2));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(fast.next().await.unwrap().unwrap().price(), 2.0);

        // Slow session drains its backlog, then reports the eviction.
        assert_eq!(slow.next().await.unwrap().unwrap().price(), 1.0);
        assert!(matches!(
            slow.next().await,
            Some(Err(SessionError::Evicted(DeliveryFailure::MailboxFull)))
        ));
        assert!(slow.next().await.is_none());
    }

    #[tokio::test]
    async fn per_session_order_matches_publish_order() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut session = hub.subscribe();

        for i in 0..100 {
            hub.publish(update("ETHUSD", f64::from(i), i64::from(i)));
        }

        for i in 0..100 {
            let got = session.next().await.unwrap().unwrap();
            assert_eq!(got.timestamp(), i64::from(i));
        }
    }

    #[tokio::test]
    async fn close_ends_sessions_and_rejects_new_ones() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut session = hub.subscribe();

        hub.close();
        assert!(hub.is_closed());
        assert_eq!(hub.subscriber_count(), 0);

        let ended = timeout(Duration::from_secs(1), session.next()).await.unwrap();
        assert!(ended.is_none());

        let mut late = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 0);
        let result = timeout(Duration::from_secs(1), late.next()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_publishers_reach_all_sessions() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut sessions: Vec<_> = (0..4).map(|_| hub.subscribe()).collect();

        let mut handles = vec![];
        for t in ["BTCUSD", "ETHUSD", "SOLUSD"] {
            let hub = Arc::clone(&hub);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    hub.publish(update(t, f64::from(i), i64::from(i)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for session in &mut sessions {
            let mut last_per_ticker: HashMap<String, i64> = HashMap::new();
            for _ in 0..150 {
                let got = session.next().await.unwrap().unwrap();
                let last = last_per_ticker
                    .entry(got.ticker().to_string())
                    .or_insert(-1);
                assert!(got.timestamp() > *last, "per-ticker order preserved");
                *last = got.timestamp();
            }
        }

        assert_eq!(hub.stats().delivered, 600);
    }

    #[test]
    fn price_sink_impl_publishes() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let sink: Arc<dyn PriceSink> = hub.clone();
        sink.publish(update("BTCUSD", 1.0, 1));
        assert_eq!(hub.stats().published, 1);
    }

    #[test]
    fn delivery_failure_names() {
        assert_eq!(DeliveryFailure::MailboxFull.as_str(), "mailbox_full");
        assert_eq!(DeliveryFailure::MailboxClosed.as_str(), "mailbox_closed");
    }
}

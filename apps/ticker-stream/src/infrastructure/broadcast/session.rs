//! Stream Sessions
//!
//! A [`StreamSession`] turns the hub's push-style delivery into a lazy,
//! cancelable sequence pulled one update at a time by its consumer.
//!
//! The consumer waits on the mailbox and the cancellation token together,
//! so a disconnect is noticed as soon as the token fires and no polling
//! interval is involved.

use std::sync::Arc;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use super::mailbox::MailboxReceiver;
use super::{BroadcastHub, DeliveryFailure, Detach, SessionHandle, Subscriber};
use crate::domain::session::{CloseReason, SessionId, SessionState};
use crate::domain::ticker::PriceUpdate;
use crate::infrastructure::metrics;

/// Fatal error ending one session's stream.
///
/// Surfaced only to the owning session's consumer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The hub evicted the session after a delivery failure.
    #[error("session evicted: {0}")]
    Evicted(DeliveryFailure),
    /// The hub shut down while the session was open.
    #[error("broadcast hub closed")]
    HubClosed,
    /// The consumer hit an unrecoverable error while yielding.
    #[error("session failed: {0}")]
    Local(String),
}

enum Wake {
    Cancelled,
    Mailbox(Option<PriceUpdate>),
}

/// One client's live subscription.
///
/// Dropping an open session closes it, so a consumer that simply goes away
/// still releases its registration.
pub struct StreamSession {
    hub: Arc<BroadcastHub>,
    subscriber: Arc<Subscriber>,
    mailbox: MailboxReceiver,
    cancel: CancellationToken,
    state: SessionState,
}

impl StreamSession {
    pub(crate) fn new(
        hub: Arc<BroadcastHub>,
        subscriber: Arc<Subscriber>,
        mailbox: MailboxReceiver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hub,
            subscriber,
            mailbox,
            cancel,
            state: SessionState::Open,
        }
    }

    /// The session's identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.subscriber.id
    }

    /// Handle for [`BroadcastHub::unsubscribe`].
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.subscriber.id,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Token that cancels this session when fired.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Updates waiting in the mailbox.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    /// Wait for the next update.
    ///
    /// Returns:
    /// - `Some(Ok(update))` for the oldest pending update
    /// - `Some(Err(e))` once, when a fatal session error closes the stream
    /// - `None` after cancellation, unsubscribe, or once closed
    pub async fn next(&mut self) -> Option<Result<PriceUpdate, SessionError>> {
        if !self.state.is_open() {
            return None;
        }

        let wake = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Wake::Cancelled,
            update = self.mailbox.recv() => Wake::Mailbox(update),
        };

        match wake {
            Wake::Mailbox(Some(update)) => Some(Ok(update)),
            Wake::Cancelled => {
                self.close(CloseReason::Cancelled);
                None
            }
            Wake::Mailbox(None) => match self.subscriber.detach_reason() {
                Some(Detach::Evicted(failure)) => {
                    self.close(CloseReason::Failed);
                    Some(Err(SessionError::Evicted(failure)))
                }
                Some(Detach::HubClosed) => {
                    self.close(CloseReason::Failed);
                    Some(Err(SessionError::HubClosed))
                }
                Some(Detach::Unsubscribed) | None => {
                    self.close(CloseReason::Cancelled);
                    None
                }
            },
        }
    }

    /// Close the session after an unrecoverable consumer-side error.
    ///
    /// Returns the error to surface to this session's client.
    pub fn fail(&mut self, reason: impl Into<String>) -> SessionError {
        let error = SessionError::Local(reason.into());
        tracing::warn!(session_id = %self.id(), error = %error, "Session failed");
        self.close(CloseReason::Failed);
        error
    }

    /// Convert into a `Stream` of updates.
    pub fn into_stream(self) -> impl Stream<Item = Result<PriceUpdate, SessionError>> + Send {
        futures_util::stream::unfold(self, |mut session| async move {
            session.next().await.map(|item| (item, session))
        })
    }

    /// Open → Draining → Closed. Runs at most once.
    fn close(&mut self, reason: CloseReason) {
        if !self.state.is_open() {
            return;
        }
        self.state = SessionState::Draining;

        self.hub.unsubscribe(self.handle());
        let discarded = self.mailbox.close_and_discard();

        self.state = SessionState::Closed;
        metrics::record_session_closed(reason);
        tracing::debug!(
            session_id = %self.id(),
            reason = reason.as_str(),
            discarded,
            "Session closed"
        );
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close(CloseReason::Dropped);
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.subscriber.id)
            .field("state", &self.state)
            .field("pending", &self.mailbox.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

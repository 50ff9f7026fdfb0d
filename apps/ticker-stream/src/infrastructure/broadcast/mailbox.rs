//! Session Mailboxes
//!
//! A mailbox is a FIFO queue of pending price updates owned by one session.
//! The hub holds the sending half and the session's consumer holds the
//! receiving half. Capacity `0` selects an unbounded queue.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::DeliveryFailure;
use crate::domain::ticker::PriceUpdate;

/// Create a connected mailbox pair.
pub(crate) fn channel(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (MailboxSender::Unbounded(tx), MailboxReceiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (MailboxSender::Bounded(tx), MailboxReceiver::Bounded(rx))
    }
}

/// Producer half, held by the hub.
#[derive(Debug)]
pub(crate) enum MailboxSender {
    Bounded(mpsc::Sender<PriceUpdate>),
    Unbounded(mpsc::UnboundedSender<PriceUpdate>),
}

impl MailboxSender {
    /// Enqueue without waiting.
    pub(crate) fn try_send(&self, update: PriceUpdate) -> Result<(), DeliveryFailure> {
        match self {
            Self::Bounded(tx) => tx.try_send(update).map_err(|e| match e {
                TrySendError::Full(_) => DeliveryFailure::MailboxFull,
                TrySendError::Closed(_) => DeliveryFailure::MailboxClosed,
            }),
            Self::Unbounded(tx) => tx
                .send(update)
                .map_err(|_| DeliveryFailure::MailboxClosed),
        }
    }
}

/// Consumer half, owned by the session.
#[derive(Debug)]
pub(crate) enum MailboxReceiver {
    Bounded(mpsc::Receiver<PriceUpdate>),
    Unbounded(mpsc::UnboundedReceiver<PriceUpdate>),
}

impl MailboxReceiver {
    /// Wait for the oldest pending update.
    ///
    /// Returns `None` once the sending half is gone and the queue is empty.
    pub(crate) async fn recv(&mut self) -> Option<PriceUpdate> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Close the mailbox and discard anything still queued.
    ///
    /// Returns the number of discarded updates.
    pub(crate) fn close_and_discard(&mut self) -> usize {
        let mut discarded = 0;
        match self {
            Self::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
            }
            Self::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
            }
        }
        discarded
    }

    /// Number of updates waiting to be consumed.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Bounded(rx) => rx.len(),
            Self::Unbounded(rx) => rx.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ticker::Ticker;

    fn update(price: f64) -> PriceUpdate {
        PriceUpdate::new(Ticker::parse("BTCUSD").unwrap(), price, 1, "TEST")
    }

    #[tokio::test]
    async fn bounded_mailbox_is_fifo() {
        let (tx, mut rx) = channel(4);
        tx.try_send(update(1.0)).unwrap();
        tx.try_send(update(2.0)).unwrap();

        assert_eq!(rx.recv().await.unwrap().price(), 1.0);
        assert_eq!(rx.recv().await.unwrap().price(), 2.0);
    }

    #[test]
    fn bounded_mailbox_reports_full() {
        let (tx, _rx) = channel(1);
        tx.try_send(update(1.0)).unwrap();
        assert_eq!(tx.try_send(update(2.0)), Err(DeliveryFailure::MailboxFull));
    }

    #[test]
    fn send_after_receiver_dropped_reports_closed() {
        let (tx, rx) = channel(0);
        drop(rx);
        assert_eq!(tx.try_send(update(1.0)), Err(DeliveryFailure::MailboxClosed));
    }

    #[test]
    fn close_and_discard_counts_backlog() {
        let (tx, mut rx) = channel(0);
        for i in 0..3 {
            tx.try_send(update(f64::from(i))).unwrap();
        }
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.close_and_discard(), 3);
        assert_eq!(tx.try_send(update(9.0)), Err(DeliveryFailure::MailboxClosed));
    }

    #[tokio::test]
    async fn recv_ends_when_sender_dropped() {
        let (tx, mut rx) = channel(0);
        tx.try_send(update(1.0)).unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}

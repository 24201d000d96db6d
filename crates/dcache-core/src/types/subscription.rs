//! Channel subscriptions
//!
//! A backend hands the caller a [`Subscription`] and keeps the matching
//! [`DeliverySender`] inside its receive loop. Both share one cancellation
//! token, so cancelling from either side (or closing the backend) stops the
//! loop.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Capacity of the per-subscription delivery buffer
pub const SUBSCRIPTION_BUFFER: usize = 100;

/// One item on a subscription stream.
///
/// End of stream is signalled by `None` from [`Subscription::recv`], never
/// by a variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T = String> {
    /// A published payload, in publish order for its channel
    Message(T),
    /// The receive loop hit a transport failure and is retrying.
    /// Sent once per failure streak; the stream stays open.
    Interrupted(String),
}

impl<T> Delivery<T> {
    pub fn into_message(self) -> Option<T> {
        match self {
            Delivery::Message(message) => Some(message),
            Delivery::Interrupted(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Delivery::Message(message) => Delivery::Message(f(message)),
            Delivery::Interrupted(reason) => Delivery::Interrupted(reason),
        }
    }
}

/// Create a connected sender / subscription pair for `channel`
pub fn delivery_channel(
    channel: impl Into<String>,
    cancel: CancellationToken,
) -> (DeliverySender, Subscription) {
    let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
    (
        DeliverySender {
            sender,
            cancel: cancel.clone(),
            interrupted: false,
        },
        Subscription {
            channel: channel.into(),
            receiver,
            cancel,
        },
    )
}

/// Caller-side handle of a channel subscription
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Physical channel name this subscription listens on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next delivery. `None` once the receive loop has stopped
    /// and every buffered delivery has been drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop the receive loop. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Detached cancel handle, usable after the subscription has been moved
    pub fn canceller(&self) -> SubscriptionCanceller {
        SubscriptionCanceller(self.cancel.clone())
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Cloneable, idempotent cancel function for a subscription
#[derive(Clone, Debug)]
pub struct SubscriptionCanceller(CancellationToken);

impl SubscriptionCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// Backend-side half of a subscription
pub struct DeliverySender {
    sender: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
    interrupted: bool,
}

impl DeliverySender {
    /// Hand a payload to the subscriber. Returns `false` when the
    /// subscription was cancelled or dropped and the loop should stop.
    pub async fn deliver(&mut self, payload: String) -> bool {
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.sender.send(Delivery::Message(payload)) => sent.is_ok(),
        };
        if delivered {
            self.interrupted = false;
        }
        delivered
    }

    /// Report a transport failure. Only the first failure of a streak is
    /// forwarded; it never blocks on a full buffer.
    pub fn interrupt(&mut self, reason: impl Into<String>) {
        if self.interrupted {
            return;
        }
        self.interrupted = true;
        let _ = self.sender.try_send(Delivery::Interrupted(reason.into()));
    }

    /// Mark the end of a failure streak without delivering anything
    pub fn recovered(&mut self) {
        self.interrupted = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the subscription is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

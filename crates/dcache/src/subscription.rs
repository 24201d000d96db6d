//! Typed view over a backend subscription

use std::marker::PhantomData;

use dcache_core::{Delivery, Subscription, SubscriptionCanceller};
use futures::Stream;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::codec::decode_text;

/// Decodes every payload as `T`. Payloads that fail to decode are logged
/// and skipped; interruptions are passed through unchanged.
pub struct TypedSubscription<T> {
    inner: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + 'static> TypedSubscription<T> {
    pub(crate) fn new(inner: Subscription) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn channel(&self) -> &str {
        self.inner.channel()
    }

    /// Next decoded delivery, or `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        loop {
            match self.inner.recv().await? {
                Delivery::Message(text) => match decode_text::<T>(text) {
                    Ok(value) => return Some(Delivery::Message(value)),
                    Err(e) => warn!(
                        "Skipping undecodable message on {}: {}",
                        self.inner.channel(),
                        e
                    ),
                },
                Delivery::Interrupted(reason) => return Some(Delivery::Interrupted(reason)),
            }
        }
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn canceller(&self) -> SubscriptionCanceller {
        self.inner.canceller()
    }

    pub fn into_stream(self) -> impl Stream<Item = Delivery<T>> {
        futures::stream::unfold(self, |mut sub| async move {
            let next = sub.recv().await?;
            Some((next, sub))
        })
    }

    pub fn into_inner(self) -> Subscription {
        self.inner
    }
}

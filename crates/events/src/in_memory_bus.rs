//! In-memory bus for tests/dev and single-process deployments.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    #[error("subscriber list lock poisoned")]
    Poisoned,
}

type Filter<M> = Box<dyn Fn(&M) -> bool + Send>;

struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    filter: Option<Filter<M>>,
}

impl<M: Clone> Subscriber<M> {
    /// Deliver if the filter accepts. `false` once the receiving side is gone.
    fn offer(&self, message: &M) -> bool {
        if self.filter.as_ref().is_some_and(|accept| !accept(message)) {
            return true;
        }
        self.sender.send(message.clone()).is_ok()
    }
}

/// Channel-per-subscriber fan-out. No IO, no async.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Subscribe to the messages `accept` returns true for, e.g. one
    /// notification topic for a UI channel.
    pub fn subscribe_where<F>(&self, accept: F) -> Subscription<M>
    where
        F: Fn(&M) -> bool + Send + 'static,
    {
        self.attach(Some(Box::new(accept)))
    }

    fn attach(&self, filter: Option<Filter<M>>) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        // On a poisoned lock the sender drops and the subscription reads as
        // disconnected.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { sender, filter });
        }
        Subscription::new(receiver)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        subs.retain(|sub| sub.offer(&message));
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.attach(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(1u32).unwrap();
        bus.publish(2u32).unwrap();

        assert_eq!(a.drain(), vec![1, 2]);
        assert_eq!(b.drain(), vec![1, 2]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned_on_publish() {
        let bus = InMemoryEventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish("x").unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), "x");
    }

    #[test]
    fn filtered_subscription_skips_rejected_messages() {
        let bus = InMemoryEventBus::new();
        let evens = bus.subscribe_where(|n: &u32| n % 2 == 0);
        let all = bus.subscribe();

        for n in 1..=4u32 {
            bus.publish(n).unwrap();
        }

        assert_eq!(evens.drain(), vec![2, 4]);
        assert_eq!(all.drain(), vec![1, 2, 3, 4]);
        assert_eq!(bus.subscriber_count(), 2);
    }
}

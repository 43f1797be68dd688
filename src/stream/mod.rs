use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::round::RoundEvent;

const LOG_TARGET: &str = "gem_roulette::stream";

type SubscriberMap = DashMap<Uuid, mpsc::Sender<RoundEvent>>;

/// Fan-out of round events to connected clients.
///
/// Each subscriber owns a bounded queue; publishing is a non-blocking
/// `try_send` per subscriber so a slow consumer can never backpressure the
/// scheduler. A subscriber whose queue overflows (or whose receiver is gone)
/// is dropped from the registry and must re-subscribe, at which point it
/// receives a fresh snapshot. Dropping a [`Subscription`] detaches it
/// immediately, independent of publish traffic.
pub struct EventHub {
    subscribers: Arc<SubscriberMap>,
    queue_depth: usize,
}

/// Removes its subscriber from the registry when dropped.
pub struct SubscriberGuard {
    id: Uuid,
    subscribers: Arc<SubscriberMap>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if self.subscribers.remove(&self.id).is_some() {
            debug!(
                target: LOG_TARGET,
                subscriber = %self.id,
                total = self.subscribers.len(),
                "subscriber detached"
            );
        }
    }
}

pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<RoundEvent>,
    /// Rides with whatever consumes the receiver; dropping it unsubscribes.
    pub guard: SubscriberGuard,
}

impl EventHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        debug!(
            target: LOG_TARGET,
            subscriber = %id,
            total = self.subscribers.len(),
            "subscriber attached"
        );
        Subscription {
            id,
            receiver: rx,
            guard: SubscriberGuard {
                id,
                subscribers: Arc::clone(&self.subscribers),
            },
        }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            debug!(
                target: LOG_TARGET,
                subscriber = %id,
                total = self.subscribers.len(),
                "subscriber detached"
            );
        }
    }

    /// Deliver an event to every live subscriber. Never blocks.
    pub fn publish(&self, event: &RoundEvent) {
        let mut dropped = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        target: LOG_TARGET,
                        subscriber = %entry.key(),
                        event = event.event_name(),
                        "subscriber queue overflow; disconnecting"
                    );
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*entry.key());
                }
            }
        }
        for id in dropped {
            self.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::RoundEvent;

    fn ended(round_number: u64) -> RoundEvent {
        RoundEvent::RoundEnded { round_number }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let hub = EventHub::new(8);
        let mut sub = hub.subscribe();
        hub.publish(&ended(1));
        hub.publish(&ended(2));

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert!(matches!(first, RoundEvent::RoundEnded { round_number: 1 }));
        assert!(matches!(second, RoundEvent::RoundEnded { round_number: 2 }));
    }

    #[tokio::test]
    async fn dropping_the_subscription_detaches_immediately() {
        let hub = EventHub::new(8);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        // No publish needed: the guard detaches on drop.
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_alone_detaches() {
        let hub = EventHub::new(8);
        let sub = hub.subscribe();
        let Subscription {
            guard, receiver, ..
        } = sub;
        assert_eq!(hub.subscriber_count(), 1);

        drop(guard);
        assert_eq!(hub.subscriber_count(), 0);
        drop(receiver);
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected() {
        let hub = EventHub::new(2);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        // Queue depth 2: the third publish overflows and evicts.
        hub.publish(&ended(1));
        hub.publish(&ended(2));
        hub.publish(&ended(3));
        assert_eq!(hub.subscriber_count(), 0);

        // The two queued events are still readable; the channel then ends.
        let mut receiver = sub.receiver;
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_receiver_is_also_reaped_on_publish() {
        let hub = EventHub::new(8);
        let sub = hub.subscribe();
        // Keep the guard alive so only the publish path can reap.
        let Subscription { guard, receiver, .. } = sub;
        drop(receiver);

        hub.publish(&ended(1));
        assert_eq!(hub.subscriber_count(), 0);
        drop(guard);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let hub = EventHub::new(1);
        let slow = hub.subscribe();
        let mut fast = hub.subscribe();

        hub.publish(&ended(1));
        assert!(fast.receiver.recv().await.is_some());
        hub.publish(&ended(2));
        assert!(fast.receiver.recv().await.is_some());

        // The slow consumer overflowed on the second publish and was evicted;
        // the fast consumer is untouched.
        assert_eq!(hub.subscriber_count(), 1);
        drop(slow);
    }
}

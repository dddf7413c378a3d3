//! Event fan-out.
//!
//! A single ordered broadcast stream. Delivery to subscribers is
//! best-effort and at-most-once: a receiver that falls more than the
//! channel capacity behind observes a lag error and loses the overwritten
//! events. Publishing never blocks and never fails the matching path.

use matching_engine::events::{EventMessage, ExchangeEvent};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; a bus with no subscribers swallows it.
    pub fn publish(&self, event: ExchangeEvent) {
        let label = event.label();
        let message = EventMessage::new(event, now_nanos());
        let delivered = self.tx.send(message).unwrap_or(0);
        trace!(event = label, subscribers = delivered, "event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::OrderId;
    use types::order::OrderStatus;

    fn cancel_event(id: u64) -> ExchangeEvent {
        ExchangeEvent::CancelOrder {
            order_id: OrderId::new(id),
            status: OrderStatus::Canceled,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(cancel_event(1));
        bus.publish(cancel_event(2));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event.label(), "cancel_order");
        assert!(first.timestamp <= second.timestamp);
        match (first.event, second.event) {
            (
                ExchangeEvent::CancelOrder { order_id: a, .. },
                ExchangeEvent::CancelOrder { order_id: b, .. },
            ) => {
                assert_eq!(a, OrderId::new(1));
                assert_eq!(b, OrderId::new(2));
            }
            _ => panic!("unexpected events"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(cancel_event(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_loss() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(cancel_event(i));
        }
        // The first recv reports how far behind the receiver fell.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}

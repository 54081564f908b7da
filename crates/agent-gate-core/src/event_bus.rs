//! Bounded broadcast fan-out for lifecycle notifications.
//!
//! Publishing never blocks and never runs subscriber code. Each subscriber
//! drains its own bounded queue; one that falls behind loses the oldest
//! events instead of stalling the producer.

use std::panic::{self, AssertUnwindSafe};

use futures::StreamExt;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast bus with explicit subscription handles.
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T> Default for EventBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    /// Create a bus with the default queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscribers buffer at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: T) -> usize {
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Raw receiver for callers that drive their own loop.
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Stream of events; gaps from lagging are skipped.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, T> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event stream lagging, events dropped");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Register a listener, dispatched on its own task.
    ///
    /// A panicking listener is isolated: the panic is logged, the event is
    /// dropped for that listener only, and dispatch continues. Drop or
    /// `unsubscribe` the returned handle to stop delivery.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut rx = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                            tracing::warn!("Event listener panicked");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event listener lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { task }
    }
}

/// Handle owning one listener registration.
#[derive(Debug)]
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering events to the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Whether the listener task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_listener_receives_events() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe(move |n: &u32| {
            let _ = tx.send(*n);
        });

        assert_eq!(bus.publish(1), 1);
        bus.publish(2);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (bad_tx, mut bad_rx) = mpsc::unbounded_channel();

        let _bad = bus.subscribe(move |n: &u32| {
            let _ = bad_tx.send(*n);
            assert!(*n != 1, "listener failure");
        });
        let _good = bus.subscribe(move |n: &u32| {
            let _ = tx.send(*n);
        });

        bus.publish(1);
        bus.publish(2);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        // The failing listener keeps receiving after its panic.
        assert_eq!(bad_rx.recv().await, Some(1));
        assert_eq!(bad_rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe(move |n: &u32| {
            let _ = tx.send(*n);
        });

        bus.publish(1);
        assert_eq!(rx.recv().await, Some(1));

        sub.unsubscribe();
        bus.publish(2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(7), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_stream_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.stream();

        for n in 1..=5u32 {
            bus.publish(n);
        }

        assert_eq!(stream.next().await, Some(4));
        assert_eq!(stream.next().await, Some(5));
    }
}

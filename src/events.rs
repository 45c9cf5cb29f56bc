//! The event bus: a bounded, in-process, multi-producer/multi-consumer queue
//! of domain events, drained by a background worker task.
//!
//! `publish` is non-blocking in the common case and returns before the event
//! is processed. Ordering across different events is not guaranteed: an
//! implementer may observe FIFO delivery in practice, but consumers must not
//! depend on it. The channel is bounded, with an overload counter, so a
//! publisher that hits a full channel drops the event and records the drop
//! rather than blocking the caller or the lock holder that is about to
//! release a mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::transaction::{TransactionId, TransactionStatus};

/// A domain event published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A `ProcessTransaction` request reached a terminal outcome.
    TransactionProcessed {
        /// A unique id for this event instance.
        event_id: Uuid,
        /// When the event was created.
        timestamp: DateTime<Utc>,
        /// The transaction this event reports on.
        transaction_id: TransactionId,
        /// Its terminal status.
        status: TransactionStatus,
    },
}

impl DomainEvent {
    /// Builds a `TransactionProcessed` event for `transaction_id`/`status`,
    /// stamping it with a fresh id and the current time.
    #[must_use]
    pub fn transaction_processed(transaction_id: TransactionId, status: TransactionStatus) -> Self {
        DomainEvent::TransactionProcessed {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transaction_id,
            status,
        }
    }
}

/// The default channel capacity used by [`EventBus::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// A handle consumers use to process events one at a time.
pub trait EventHandler: Send + Sync {
    /// Handles a single event. Errors are logged and skipped -- a failing
    /// handler never stops the worker from draining the rest of the queue.
    fn handle(&self, event: &DomainEvent) -> Result<(), String>;
}

/// The bounded, multi-producer/multi-consumer event queue.
///
/// Cloning an `EventBus` shares the same underlying channel -- every clone is
/// a producer handle. The single receiver is handed to
/// [`EventBus::spawn_worker`] once; subsequent clones can still publish.
pub struct EventBus {
    sender: mpsc::Sender<DomainEvent>,
    dropped: Arc<AtomicU64>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        EventBus {
            sender: self.sender.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl EventBus {
    /// Creates a bus with [`DEFAULT_CAPACITY`] buffered events.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<DomainEvent>) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            EventBus {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Publishes an event without waiting for it to be processed.
    ///
    /// Non-blocking: if the channel is full, the event is dropped and the
    /// overload counter is incremented rather than applying back-pressure to
    /// the caller (which, in the engine, would otherwise stall while still
    /// holding the per-account lock).
    pub fn publish(&self, event: DomainEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("event bus full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("event bus worker has shut down, dropping event");
            }
        }
    }

    /// The number of events dropped so far due to a full channel.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawns the background worker that drains `receiver` until the
    /// channel closes (every producer handle dropped) or `cancel` fires,
    /// processing each event at-least-once via `handler`. Per-event errors
    /// are logged and skipped, never silently lost, never blocking a
    /// publisher.
    pub fn spawn_worker<H>(
        mut receiver: mpsc::Receiver<DomainEvent>,
        handler: H,
        cancel: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        H: EventHandler + 'static,
    {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_event = receiver.recv() => {
                        match maybe_event {
                            Some(event) => {
                                if let Err(err) = handler.handle(&event) {
                                    tracing::error!(error = %err, "event handler failed, skipping event");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &DomainEvent) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_is_drained_by_worker() {
        let (bus, receiver) = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = tokio_util::sync::CancellationToken::new();
        let handler = CountingHandler {
            count: count.clone(),
        };
        let worker = EventBus::spawn_worker(receiver, handler, cancel.clone());

        for _ in 0..5 {
            bus.publish(DomainEvent::transaction_processed(
                TransactionId::new(),
                TransactionStatus::Completed,
            ));
        }

        // Give the worker a chance to drain, then shut it down.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        worker.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let (bus, _receiver) = EventBus::with_capacity(1);
        bus.publish(DomainEvent::transaction_processed(
            TransactionId::new(),
            TransactionStatus::Completed,
        ));
        bus.publish(DomainEvent::transaction_processed(
            TransactionId::new(),
            TransactionStatus::Completed,
        ));
        assert_eq!(bus.dropped_count(), 1);
    }

    #[test]
    fn handler_errors_do_not_panic() {
        struct FailingHandler;
        impl EventHandler for FailingHandler {
            fn handle(&self, _event: &DomainEvent) -> Result<(), String> {
                Err("boom".to_string())
            }
        }
        let results: Arc<Mutex<Vec<Result<(), String>>>> = Arc::new(Mutex::new(Vec::new()));
        let handler = FailingHandler;
        let event = DomainEvent::transaction_processed(TransactionId::new(), TransactionStatus::Failed);
        results.lock().unwrap().push(handler.handle(&event));
        assert!(results.lock().unwrap()[0].is_err());
    }
}

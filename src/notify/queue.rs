// =============================================================================
// Notification Queue — single consumer, FIFO, rate-limited delivery
// =============================================================================
//
// State machine of the consumer task:
//
//   Idle --(message arrives)--> Sending --(attempt done)--> Waiting
//     ^                                                        |
//     +--------------------(min interval elapsed)--------------+
//
// The interval is slept after EVERY attempt, successful or not, so two
// consecutive attempts are always at least `min_interval` apart. Failures
// and timeouts are logged and dropped; there is no retry (at-most-once).
//
// `enqueue` never blocks. It hands back a `DeliveryHandle` that resolves
// once that message's attempt has completed.
// =============================================================================

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::collaborators::NotificationSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Sending,
    /// Attempt finished, pacing before the next one.
    Waiting,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
    TimedOut,
    /// The consumer task is gone; the message was never attempted.
    QueueClosed,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Resolves once the associated message has been attempted.
#[derive(Debug)]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryHandle {
    pub async fn outcome(self) -> DeliveryOutcome {
        self.rx.await.unwrap_or(DeliveryOutcome::QueueClosed)
    }
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub state: QueueState,
    pub pending: usize,
    pub delivered: u64,
    pub failed: u64,
}

struct Job {
    message: String,
    done: oneshot::Sender<DeliveryOutcome>,
}

struct Shared {
    state: Mutex<QueueState>,
    pending: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: QueueState) {
        *self.state.lock() = state;
    }
}

pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
    min_interval: Duration,
}

impl NotificationQueue {
    /// Start the consumer task on the current runtime.
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        min_interval: Duration,
        send_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::Idle),
            pending: AtomicUsize::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        tokio::spawn(run_consumer(
            rx,
            sink,
            Arc::clone(&shared),
            min_interval,
            send_timeout,
        ));

        info!(
            min_interval_ms = min_interval.as_millis() as u64,
            send_timeout_ms = send_timeout.as_millis() as u64,
            "notification queue started"
        );

        Self {
            tx,
            shared,
            min_interval,
        }
    }

    /// Append `message` to the queue.
    pub fn enqueue(&self, message: impl Into<String>) -> DeliveryHandle {
        let (done, rx) = oneshot::channel();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job {
            message: message.into(),
            done,
        }) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("notification queue closed, message dropped");
            let _ = job.done.send(DeliveryOutcome::QueueClosed);
        }

        DeliveryHandle { rx }
    }

    pub fn state(&self) -> QueueState {
        *self.shared.state.lock()
    }

    /// Messages accepted but not yet picked up by the consumer.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            state: self.state(),
            pending: self.pending(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

async fn run_consumer(
    mut rx: mpsc::UnboundedReceiver<Job>,
    sink: Arc<dyn NotificationSink>,
    shared: Arc<Shared>,
    min_interval: Duration,
    send_timeout: Duration,
) {
    while let Some(job) = rx.recv().await {
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        shared.set_state(QueueState::Sending);

        let outcome = match tokio::time::timeout(send_timeout, sink.send(&job.message)).await {
            Ok(Ok(())) => {
                shared.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(chars = job.message.len(), "notification delivered");
                DeliveryOutcome::Delivered
            }
            Ok(Err(e)) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "notification delivery failed, dropping");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_ms = send_timeout.as_millis() as u64,
                    "notification delivery timed out, dropping"
                );
                DeliveryOutcome::TimedOut
            }
        };

        shared.set_state(QueueState::Waiting);
        let _ = job.done.send(outcome);

        tokio::time::sleep(min_interval).await;
        shared.set_state(QueueState::Idle);
    }

    info!("notification queue closed");
}

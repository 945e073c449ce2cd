use std::sync::{Arc, RwLock};

use roadmap_common::messages::ProfileEvent;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Default number of events buffered between the consumer and the workers.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IngressError {
    #[error("ingress queue is closed")]
    Closed,
}

/// Bounded queue handing profile events from the broker consumer to the worker pool.
///
/// Any number of producers may enqueue; when the queue is full they wait for a worker to
/// dequeue. All workers share one receiving end. Closing the queue rejects new events and
/// wakes blocked producers with `IngressError::Closed`, while events already buffered are
/// still handed out until the queue is drained.
pub struct IngressQueue {
    sender: RwLock<Option<mpsc::Sender<ProfileEvent>>>,
    receiver: IngressReceiver,
    closed: CancellationToken,
    capacity: usize,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            sender: RwLock::new(Some(sender)),
            receiver: IngressReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
            closed: CancellationToken::new(),
            capacity,
        }
    }

    /// Enqueue an event, waiting for room if the queue is full.
    pub async fn enqueue(&self, event: ProfileEvent) -> Result<(), IngressError> {
        let sender = self
            .sender
            .read()
            .ok()
            .and_then(|sender| (*sender).clone())
            .ok_or(IngressError::Closed)?;

        tokio::select! {
            biased;

            _ = self.closed.cancelled() => Err(IngressError::Closed),
            sent = sender.send(event) => {
                report_depth(sender.max_capacity() - sender.capacity());
                sent.map_err(|_| IngressError::Closed)
            }
        }
    }

    /// Stop accepting events. Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let sender = match self.sender.write() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.closed.cancel();

        sender.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A handle on the receiving end. Every handle drains the same queue.
    pub fn receiver(&self) -> IngressReceiver {
        self.receiver.clone()
    }
}

impl Default for IngressQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Clone)]
pub struct IngressReceiver {
    inner: Arc<Mutex<mpsc::Receiver<ProfileEvent>>>,
}

impl IngressReceiver {
    /// Wait for the next event. Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<ProfileEvent> {
        let mut receiver = self.inner.lock().await;
        let event = receiver.recv().await;
        report_depth(receiver.len());
        event
    }

    /// Number of events buffered and not yet handed to a worker.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn report_depth(depth: usize) {
    metrics::gauge!("roadmap_ingress_queue_depth").set(depth as f64);
}

//! Per-subject ingress queue, subscriber registry, and dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};

use super::Payload;
use super::error::BusError;
use super::subscription::SubscriptionState;

/// Subscriber set and the closed flag, guarded by one lock so a racing
/// register cannot land in a subject that is being torn down.
struct Registry {
    by_id: HashMap<String, Arc<SubscriptionState>>,
    closed: bool,
}

/// A named channel: one bounded ingress queue, one dispatcher task, and
/// the set of attached subscriptions.
pub(crate) struct Subject {
    name: String,
    ingress_tx: mpsc::Sender<Payload>,
    /// Taken exactly once when the dispatcher starts.
    ingress_rx: Mutex<Option<mpsc::Receiver<Payload>>>,
    registry: RwLock<Registry>,
    dispatcher_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl Subject {
    pub(crate) fn new(name: &str, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            name: name.to_string(),
            ingress_tx: tx,
            ingress_rx: Mutex::new(Some(rx)),
            registry: RwLock::new(Registry {
                by_id: HashMap::new(),
                closed: false,
            }),
            dispatcher_stop: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher. Called after the subject is inserted into
    /// the bus mapping, so no publish can observe a missing subject that
    /// is about to exist.
    pub(crate) fn start_dispatcher(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let Some(mut rx) = self.ingress_rx.lock().take() else {
            return;
        };
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.dispatcher_stop.lock() = Some(stop_tx);

        let subject = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(subject = %subject.name, "Subject dispatcher started");
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = shutdown_rx.wait_for(|&v| v) => break,
                    msg = rx.recv() => match msg {
                        Some(payload) => subject.deliver(payload),
                        None => break,
                    },
                }
            }
            tracing::debug!(subject = %subject.name, "Subject dispatcher stopped");
        });
    }

    /// Enqueue a payload, waiting for ingress space. Aborted by the bus
    /// shutdown signal; a subject that closed underneath the caller
    /// swallows the payload instead of failing it.
    pub(crate) async fn publish(
        &self,
        payload: Payload,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        if self.registry.read().closed {
            return Ok(());
        }

        let ingress = self.ingress_tx.clone();
        tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|&v| v) => Err(BusError::Closed),
            res = ingress.send(payload) => {
                // Err means the dispatcher already exited; the payload is
                // silently dropped.
                let _ = res;
                Ok(())
            }
        }
    }

    /// Offer the payload to every subscriber's delivery queue; never
    /// blocks on a slow subscriber.
    fn deliver(&self, payload: Payload) {
        let registry = self.registry.read();
        for sub in registry.by_id.values() {
            sub.offer(payload.clone());
        }
    }

    /// Attach a subscription. Fails if the subject lost the race with its
    /// last unsubscribe and already closed; the caller retries against a
    /// fresh subject.
    pub(crate) fn register(&self, state: Arc<SubscriptionState>) -> bool {
        let mut registry = self.registry.write();
        if registry.closed {
            return false;
        }
        registry.by_id.insert(state.id.clone(), state);
        true
    }

    /// Remove a subscription. When the set becomes empty the subject
    /// closes itself in the same critical section, so a racing register
    /// cannot land in a subject that is being torn down; returns true
    /// when that happened and the caller must drop the mapping entry.
    pub(crate) fn unregister(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        if registry.closed {
            return false;
        }
        registry.by_id.remove(id);
        if !registry.by_id.is_empty() {
            return false;
        }

        registry.closed = true;
        if let Some(stop) = self.dispatcher_stop.lock().take() {
            let _ = stop.send(());
        }
        true
    }

    /// Stop the dispatcher and close every remaining subscription's
    /// delivery queue. Idempotent.
    pub(crate) fn close(&self) {
        let mut registry = self.registry.write();
        if registry.closed {
            return;
        }
        registry.closed = true;

        if let Some(stop) = self.dispatcher_stop.lock().take() {
            let _ = stop.send(());
        }
        for sub in registry.by_id.values() {
            sub.close_queue();
        }
        registry.by_id.clear();
    }
}

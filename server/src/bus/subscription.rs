//! Per-subscriber state: delivery queue, worker, unsubscribe latch.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{Bus, MessageHandler, Payload};
use crate::utils::id;

/// Shared per-subscriber state, referenced by the subject's registry and
/// by the public [`Subscription`] handle.
pub(crate) struct SubscriptionState {
    pub(crate) id: String,
    pub(crate) subject: String,
    handler: MessageHandler,
    /// Delivery queue sender; closing the queue is dropping the sender.
    delivery_tx: Mutex<Option<mpsc::Sender<Payload>>>,
    /// Taken exactly once when the delivery worker starts.
    delivery_rx: Mutex<Option<mpsc::Receiver<Payload>>>,
    /// Cancelled when the delivery queue closes, for observers such as
    /// the streaming frontend.
    done: CancellationToken,
    unsubscribed: AtomicBool,
}

impl SubscriptionState {
    pub(crate) fn new(subject: &str, handler: MessageHandler, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            id: id::generate(),
            subject: subject.to_string(),
            handler,
            delivery_tx: Mutex::new(Some(tx)),
            delivery_rx: Mutex::new(Some(rx)),
            done: CancellationToken::new(),
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Non-blocking offer from the subject dispatcher. A full queue drops
    /// the payload for this subscriber only.
    pub(crate) fn offer(&self, payload: Payload) {
        let guard = self.delivery_tx.lock();
        let Some(tx) = guard.as_ref() else { return };
        match tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    subscription_id = %self.id,
                    subject = %self.subject,
                    "Delivery queue full, dropping message"
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the delivery queue. The worker drains what it already holds
    /// and exits. Idempotent.
    pub(crate) fn close_queue(&self) {
        self.delivery_tx.lock().take();
        self.done.cancel();
    }

    /// Spawn the delivery worker: reads the queue one payload at a time
    /// and invokes the handler, strictly sequentially.
    pub(crate) fn start_worker(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        handlers: TaskTracker,
    ) {
        let Some(mut rx) = self.delivery_rx.lock().take() else {
            return;
        };
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = async { let _ = shutdown_rx.wait_for(|&v| v).await; } => break,
                    msg = rx.recv() => match msg {
                        Some(payload) => state.invoke(payload, &handlers).await,
                        None => break,
                    },
                }
            }
        });
    }

    /// Run one handler invocation inside the tracker and the panic
    /// boundary. A panicking handler is logged and contained here; it
    /// never reaches the publisher or the shutdown path.
    async fn invoke(&self, payload: Payload, handlers: &TaskTracker) {
        let invocation = AssertUnwindSafe((self.handler)(payload)).catch_unwind();
        if let Err(panic) = handlers.track_future(invocation).await {
            tracing::error!(
                subscription_id = %self.id,
                subject = %self.subject,
                panic = panic_message(panic.as_ref()),
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "Panic in message handler"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// A single subscriber's live attachment to a subject.
///
/// Unsubscribes when dropped; [`Subscription::unsubscribe`] may also be
/// called explicitly and is idempotent.
pub struct Subscription {
    state: Arc<SubscriptionState>,
    bus: Weak<Bus>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id)
            .field("subject", &self.state.subject)
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>, bus: Weak<Bus>) -> Self {
        Self { state, bus }
    }

    /// Unique id of this subscription.
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Name of the subject this subscription is attached to.
    pub fn subject(&self) -> &str {
        &self.state.subject
    }

    /// Detach from the subject. The first call removes the subscription
    /// and, if it was the last one, drops the subject; later calls are
    /// no-ops. Safe to call while the bus is closing.
    pub fn unsubscribe(&self) {
        if self.state.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscription(&self.state);
        }
        self.state.close_queue();
    }

    /// Completes once the delivery queue has been closed, whether by
    /// unsubscribe or by the bus shutting down.
    pub async fn closed(&self) {
        self.state.done.cancelled().await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

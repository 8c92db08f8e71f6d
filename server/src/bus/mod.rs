//! In-process publish/subscribe bus
//!
//! Subjects are created on first subscribe and dropped with their last
//! unsubscribe; a subject with zero subscribers never exists. Each subject
//! owns a bounded ingress queue drained by one dispatcher task; each
//! subscription owns a bounded delivery queue drained by one worker task
//! that invokes the handler sequentially.
//!
//! ## Backpressure
//!
//! Publishing waits for ingress-queue space. Fan-out never waits: a full
//! delivery queue drops the payload for that subscriber only, with a
//! warning. Slow subscribers cannot stall other subscribers or publishers.
//!
//! ## Shutdown
//!
//! [`Bus::close`] is one-way. It fires a broadcast signal observed by all
//! dispatchers and workers, tears down every subject, then waits up to a
//! deadline for in-flight handler invocations to finish. Payloads still
//! queued when the signal fires are discarded; delivery is best-effort
//! across shutdown.

mod error;
mod subject;
mod subscription;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

pub use error::BusError;
pub use subscription::Subscription;

use subject::Subject;
use subscription::SubscriptionState;

/// Ingress queue capacity used when none is configured.
pub const DEFAULT_SUBJECT_BUFFER: usize = 16;

/// Delivery queue capacity used when none is configured.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

/// Opaque payload carried by reference through the bus.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Per-delivery callback. Invocations are sequential per subscription and
/// parallel across subscriptions.
pub type MessageHandler = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adapt an async closure into a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// Queue capacities for subjects and subscriptions.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub subject_buffer: usize,
    pub subscription_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subject_buffer: DEFAULT_SUBJECT_BUFFER,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

impl BusConfig {
    /// Zero capacities fall back to the defaults.
    fn normalized(mut self) -> Self {
        if self.subject_buffer == 0 {
            self.subject_buffer = DEFAULT_SUBJECT_BUFFER;
        }
        if self.subscription_buffer == 0 {
            self.subscription_buffer = DEFAULT_SUBSCRIPTION_BUFFER;
        }
        self
    }
}

/// Process-wide pub/sub bus. Shared behind an [`Arc`]; all operations
/// take `&self`.
pub struct Bus {
    subjects: RwLock<HashMap<String, Arc<Subject>>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Counts in-flight handler invocations so close can await drain.
    handlers: TaskTracker,
    config: BusConfig,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            subjects: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            handlers: TaskTracker::new(),
            config: config.normalized(),
        }
    }

    /// Attach `handler` to `subject`, creating the subject on first use.
    /// Must be called from within a Tokio runtime: the subject dispatcher
    /// and the subscription's delivery worker are spawned here.
    pub fn subscribe(
        self: &Arc<Self>,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if subject.is_empty() {
            return Err(BusError::InvalidArgument("subject name is empty"));
        }

        loop {
            let subj = self.get_or_create_subject(subject);
            let state = Arc::new(SubscriptionState::new(
                subject,
                handler.clone(),
                self.config.subscription_buffer,
            ));
            // Registration fails only when the subject closed between
            // lookup and registration; retry against a fresh subject.
            if subj.register(Arc::clone(&state)) {
                state.start_worker(self.shutdown_rx.clone(), self.handlers.clone());
                return Ok(Subscription::new(state, Arc::downgrade(self)));
            }
        }
    }

    /// Deliver `payload` to every subscriber of `subject`, waiting for
    /// ingress-queue space. Returns [`BusError::NoSuchSubject`] when the
    /// subject has no subscribers.
    pub async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if subject.is_empty() {
            return Err(BusError::InvalidArgument("subject name is empty"));
        }

        let subj = self
            .subjects
            .read()
            .get(subject)
            .cloned()
            .ok_or(BusError::NoSuchSubject)?;

        subj.publish(payload, self.shutdown_rx.clone()).await
    }

    /// Close the bus: reject new work, stop every dispatcher and worker,
    /// then wait up to `timeout` for in-flight handlers to finish. The
    /// closed state stands even when the deadline elapses; remaining
    /// handlers keep draining in the background.
    pub async fn close(&self, timeout: Duration) -> Result<(), BusError> {
        {
            let mut subjects = self.subjects.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(BusError::Closed);
            }
            let _ = self.shutdown_tx.send(true);
            for (_, subj) in subjects.drain() {
                subj.close();
            }
        }

        self.handlers.close();
        match tokio::time::timeout(timeout, self.handlers.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(BusError::DeadlineExceeded),
        }
    }

    /// Detach `state` from its subject; the last unsubscribe tears the
    /// subject down and drops its mapping entry in one critical section.
    /// A publish that grabbed the subject before this lock lands on the
    /// closed flag and returns silently.
    pub(crate) fn remove_subscription(&self, state: &SubscriptionState) {
        let mut subjects = self.subjects.write();
        if self.closed.load(Ordering::Acquire) {
            // Close already tore every subject down.
            return;
        }
        let Some(subj) = subjects.get(&state.subject).cloned() else {
            return;
        };
        if subj.unregister(&state.id) {
            subjects.remove(&state.subject);
        }
    }

    fn get_or_create_subject(&self, name: &str) -> Arc<Subject> {
        if let Some(subj) = self.subjects.read().get(name) {
            return Arc::clone(subj);
        }

        let mut subjects = self.subjects.write();
        if let Some(subj) = subjects.get(name) {
            return Arc::clone(subj);
        }
        let subj = Arc::new(Subject::new(name, self.config.subject_buffer));
        subjects.insert(name.to_string(), Arc::clone(&subj));
        // Present in the mapping before the dispatcher consumes.
        subj.start_dispatcher(self.shutdown_rx.clone());
        subj
    }
}

//! # Worker handles
//!
//! A worker is a task that owns the receiving end of an inbox channel and the
//! sending end of an outbox channel. The `WorkerHandle` holds the other two
//! ends. A pump task drains the outbox:
//!
//! - results resolve the calls this side made into the worker;
//! - calls made by the worker go to the attached `MessageHandler`, if any.
//!
//! When the outbox closes (the worker ended or was terminated) every call
//! still pending on the handle fails with a disconnect.

use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use isowire::CallMessage;
use isowire::Envelope;
use isowire::Message;

use crate::port::PendingCalls;
use crate::port::Port;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Receives the calls a worker makes out of itself.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_call(&self, call: CallMessage);
}

type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

struct Inner {
    id: WorkerId,
    port: Port,
    handler: HandlerSlot,
    task: AbortHandle,
}

/// A cheap, cloneable reference to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<Inner>,
}

impl WorkerHandle {
    /// Wraps the host ends of a worker's channels and starts the outbox pump.
    pub fn new(
        inbox: mpsc::UnboundedSender<Envelope>,
        outbox: mpsc::UnboundedReceiver<Envelope>,
        task: AbortHandle,
    ) -> Self {
        let id = WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::new(PendingCalls::new());
        let handler: HandlerSlot = Arc::new(RwLock::new(None));

        // The pump must not own `Inner`, or the worker would outlive its handles.
        tokio::spawn(pump(id, outbox, pending.clone(), handler.clone()));

        Self {
            inner: Arc::new(Inner {
                id,
                port: Port::new(inbox, pending),
                handler,
                task,
            }),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    pub fn port(&self) -> &Port {
        &self.inner.port
    }

    pub fn attach_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.inner.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn detach_handler(&self) {
        *self.inner.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_handler(&self) -> bool {
        self.inner.handler.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Aborts the worker task. Calls in flight inside it are dropped and their
    /// callers see a disconnect.
    pub fn terminate(&self) {
        self.inner.task.abort();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.task.is_finished()
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for WorkerHandle {}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("pending", &self.inner.port.pending().len())
            .finish()
    }
}

async fn pump(
    id: WorkerId,
    mut outbox: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<PendingCalls>,
    handler: HandlerSlot,
) {
    while let Some(envelope) = outbox.recv().await {
        match envelope.message {
            Message::Result(result) => {
                let call_id = result.id;
                if !pending.resolve(result) {
                    tracing::debug!(worker = %id, %call_id, "result for unknown call");
                }
            }
            Message::Call(call) => {
                let handler = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
                match handler {
                    Some(handler) => handler.on_call(call),
                    None => tracing::debug!(worker = %id, call_id = %call.id, "no handler attached, call dropped"),
                }
            }
        }
    }

    tracing::debug!(worker = %id, pending = pending.len(), "worker outbox closed");
    pending.fail_all();
}

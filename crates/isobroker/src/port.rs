//! # Ports and the pending-call table
//!
//! A `Port` is the sending end of a worker channel together with the table of
//! calls waiting for a result on the opposite direction of that channel.
//!
//! ## Invariants
//!
//! - At most one pending entry exists per call id.
//! - An entry leaves the table only when its result arrives, when sending the
//!   call failed, or when the channel closes. There is no timeout.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use isowire::Envelope;
use isowire::ResultMessage;

use crate::call::CallError;
use crate::context::IsolateCtx;

/// Calls awaiting their result, keyed by call id.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: DashMap<Uuid, oneshot::Sender<ResultMessage>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call and returns the receiver its result will arrive on.
    pub fn register(&self, id: Uuid) -> Result<oneshot::Receiver<ResultMessage>, CallError> {
        match self.calls.entry(id) {
            Entry::Occupied(_) => Err(CallError::DuplicateCall(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Hands `result` to its waiting caller. Returns false when no call with
    /// that id is pending.
    pub fn resolve(&self, result: ResultMessage) -> bool {
        let Some((_, tx)) = self.calls.remove(&result.id) else {
            return false;
        };
        // The caller may have stopped waiting.
        let _ = tx.send(result);
        true
    }

    pub fn cancel(&self, id: &Uuid) {
        self.calls.remove(id);
    }

    /// Drops every pending call; their callers observe a disconnect.
    pub fn fail_all(&self) {
        self.calls.clear();
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Port {
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Arc<PendingCalls>,
}

impl Port {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, pending: Arc<PendingCalls>) -> Self {
        Self { tx, pending }
    }

    pub fn post_message(&self, envelope: Envelope) -> Result<(), CallError> {
        self.tx.send(envelope).map_err(|_| CallError::Disconnected)
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Finds the port a call to a module must be posted to.
///
/// The broker resolves through its worker registry; code running inside a
/// worker always resolves to its own outbound port.
pub trait PortResolver: Send + Sync + 'static {
    fn resolve(&self, module: &Url, segregation_id: Option<&str>) -> Result<Port, CallError>;

    /// The cache buster currently forced onto imports of `module`.
    fn cache_buster(&self, _module: &Url) -> Option<String> {
        None
    }

    fn ctx(&self) -> &IsolateCtx;
}

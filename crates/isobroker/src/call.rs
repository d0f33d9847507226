//! # Call protocol
//!
//! Sends a call to a worker and waits for the result with the same id.
//!
//! ## Invariants
//!
//! - Exactly one pending entry exists per outstanding call id; it is removed
//!   when the matching result arrives.
//! - Results for other ids are never delivered to this call, so any number of
//!   calls can be in flight on one channel.
//! - Args are marshalled before they are posted, results unmarshalled after
//!   they arrive.

use std::fmt;

use url::Url;
use uuid::Uuid;

use isowire::CallMessage;
use isowire::Envelope;
use isowire::ErrorValue;
use isowire::MarshalError;
use isowire::ResultMessage;
use isowire::Value;
use isowire::find_transferables;

use crate::broker::WorkerError;
use crate::debug::debug_log;
use crate::port::PortResolver;

/// The error outcome of a call whose target module exports no such function.
pub const FUNCTION_NOT_FOUND: &str = "Function not found";

#[derive(Debug)]
pub enum CallError {
    /// The callee failed; carries what it threw, unmarshalled.
    Remote(Value),
    Worker(WorkerError),
    Specifier(String),
    Marshal(MarshalError),
    /// The worker channel closed before a result arrived.
    Disconnected,
    DuplicateCall(Uuid),
}

impl CallError {
    pub fn is_function_not_found(&self) -> bool {
        matches!(self, Self::Remote(Value::String(s)) if s == FUNCTION_NOT_FOUND)
    }

    pub fn remote(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_remote(self) -> Option<Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }

    /// The value delivered to a worker in place of a result.
    pub fn into_value(self) -> Value {
        match self {
            Self::Remote(value) => value,
            other => Value::Error(ErrorValue::new("CallError", other.to_string())),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(Value::String(s)) => write!(f, "Remote error: {}", s),
            Self::Remote(Value::Error(e)) => write!(f, "Remote error: {}", e),
            Self::Remote(value) => write!(f, "Remote error: {:?}", value),
            Self::Worker(e) => write!(f, "Worker error: {}", e),
            Self::Specifier(details) => write!(f, "Invalid worker specifier: {}", details),
            Self::Marshal(e) => write!(f, "Marshal error: {}", e),
            Self::Disconnected => write!(f, "Worker disconnected before the call completed"),
            Self::DuplicateCall(id) => write!(f, "Call {} is already pending", id),
        }
    }
}

impl std::error::Error for CallError {}

impl From<WorkerError> for CallError {
    fn from(e: WorkerError) -> Self {
        Self::Worker(e)
    }
}

impl From<MarshalError> for CallError {
    fn from(e: MarshalError) -> Self {
        Self::Marshal(e)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Calls a function in the worker `resolver` finds for the message's target.
///
/// Resolves to the unmarshalled result, or fails with `CallError::Remote`
/// carrying the unmarshalled error. A void result is `Value::Null`.
pub async fn call_worker_fn(mut msg: CallMessage, resolver: &dyn PortResolver) -> Result<Value> {
    let port = resolver.resolve(&msg.route.target_module, msg.route.target_segregation_id())?;
    let marshal = resolver.ctx().marshal();

    msg.args = marshal.marshal_args(std::mem::take(&mut msg.args)).await?;
    let transfer = find_transferables(&msg.args);

    let id = msg.id;
    let rx = port.pending().register(id)?;

    debug_log!("sending call: {:?}", msg);

    if let Err(e) = port.post_message(Envelope::new(msg, transfer)) {
        port.pending().cancel(&id);
        return Err(e);
    }

    let result = rx.await.map_err(|_| CallError::Disconnected)?;

    debug_log!("received result: {:?}", result);

    match result.outcome {
        Ok(value) => Ok(marshal.unmarshal(value).await?),
        Err(error) => Err(CallError::Remote(marshal.unmarshal(error).await?)),
    }
}

/// Carries out a call relayed out of a worker and posts the result back to
/// the calling worker.
///
/// The propagation context is dropped so the callee starts fresh spans. A
/// call without a cache buster picks up the one the broker holds for its
/// target. The outcome is marshalled again before it crosses back.
pub(crate) async fn relay_call(mut call: CallMessage, resolver: &dyn PortResolver) {
    let Some(source) = call.route.source_module.clone() else {
        return;
    };

    debug_log!("broker received call: {:?}", call);

    call.context = None;
    if call.route.cache_buster.is_none() {
        call.route.cache_buster = resolver.cache_buster(&call.route.target_module);
    }
    let id = call.id;
    let route = call.route.clone();
    let function_name = call.function_name.clone();

    let marshal = resolver.ctx().marshal();
    let outcome = match call_worker_fn(call, resolver).await {
        Ok(value) => marshal.marshal(value).await.map_err(|e| Value::Error(e.into())),
        Err(error) => Err(marshal
            .marshal(error.into_value())
            .await
            .unwrap_or_else(|e| Value::Error(e.into()))),
    };

    let result = ResultMessage {
        id,
        route,
        function_name,
        outcome,
    };
    let transfer = match &result.outcome {
        Ok(value) | Err(value) => find_transferables([value]),
    };

    debug_log!("broker forwarding result: {:?}", result);

    let source_segregation_id = result.route.source_segregation_id.clone();
    let envelope = Envelope::new(result, transfer);
    if let Err(e) = post_back(resolver, &source, source_segregation_id.as_deref(), envelope) {
        tracing::warn!(%source, %id, error = %e, "could not return relayed result");
    }
}

fn post_back(resolver: &dyn PortResolver, source: &Url, segregation_id: Option<&str>, envelope: Envelope) -> Result<()> {
    resolver.resolve(source, segregation_id)?.post_message(envelope)
}

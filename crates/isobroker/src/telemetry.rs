//! # Telemetry shim
//!
//! The broker never talks to a tracing backend directly. Every import and
//! every call runs inside a `MsgSpan` opened by the injected `Telemetry`, and
//! the caller's span context travels with the call as an opaque `Value`.

use std::future::Future;
use std::num::NonZeroU64;

use tracing::Instrument;
use tracing::Span;
use tracing::instrument::Instrumented;

use isowire::CallMessage;
use isowire::Value;

pub trait Telemetry: Send + Sync + 'static {
    /// Opens the span for one step (`"import"`, `"call"`) of handling `msg`.
    fn msg_span(&self, name: &'static str, msg: &CallMessage) -> MsgSpan;

    /// The propagation context attached to outgoing calls.
    fn marshal_context(&self) -> Option<Value>;
}

/// A span wrapping one unit of work on behalf of a message.
#[derive(Clone, Debug)]
pub struct MsgSpan {
    span: Span,
}

impl MsgSpan {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// A span that records nothing.
    pub fn none() -> Self {
        Self { span: Span::none() }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Logs a named event inside the span.
    pub fn event(&self, name: &str) {
        if self.span.is_disabled() {
            return;
        }
        tracing::info!(parent: &self.span, "{}", name);
    }

    pub fn instrument<F: Future>(&self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}

/// The default: no spans, no context.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn msg_span(&self, _name: &'static str, _msg: &CallMessage) -> MsgSpan {
        MsgSpan::none()
    }

    fn marshal_context(&self) -> Option<Value> {
        None
    }
}

/// Telemetry on top of `tracing`.
///
/// The context is the caller's current span id. Workers share the process and
/// so the subscriber, which lets the callee parent its spans on it directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    fn parent(msg: &CallMessage) -> Option<tracing::Id> {
        let raw = msg.context.as_ref()?.as_i64()?;
        let raw = NonZeroU64::new(u64::try_from(raw).ok()?)?;
        Some(tracing::Id::from_non_zero_u64(raw))
    }
}

impl Telemetry for TracingTelemetry {
    fn msg_span(&self, name: &'static str, msg: &CallMessage) -> MsgSpan {
        let span = tracing::info_span!(
            parent: Self::parent(msg),
            "worker_msg",
            step = name,
            call_id = %msg.id,
            module = %msg.route.target_module,
            function = msg.function_name().unwrap_or_default(),
        );
        MsgSpan::new(span)
    }

    fn marshal_context(&self) -> Option<Value> {
        let id = Span::current().id()?;
        i64::try_from(id.into_u64()).ok().map(Value::Int)
    }
}

//! # Call hooks
//!
//! The pipeline a worker runs around every call it receives:
//!
//! 1. `initial_call`, once per worker, after its specifier is recorded;
//! 2. `before_call`;
//! 3. the target function;
//! 4. `on_error`, only if step 2 or 3 failed;
//! 5. `after_call`, always.
//!
//! A failing `before_call` skips the function. `on_error` returning a value
//! turns the failure into that result; returning `None` lets the error through.

use isowire::CallMessage;
use isowire::Value;

use crate::isolate::WorkerScope;

#[async_trait::async_trait]
pub trait CallHooks: Send + Sync + 'static {
    async fn initial_call(&self, _scope: &WorkerScope, _msg: &CallMessage) {}

    async fn before_call(&self, _msg: &CallMessage) -> Result<(), Value> {
        Ok(())
    }

    async fn after_call(&self, _msg: &CallMessage) {}

    async fn on_error(&self, _msg: &CallMessage, _error: &Value) -> Option<Value> {
        None
    }
}

/// Runs every stage as a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl CallHooks for NoHooks {}

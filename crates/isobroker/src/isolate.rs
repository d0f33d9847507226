//! # Worker isolates
//!
//! The code that runs on the worker side of a channel.
//!
//! ## Philosophy
//!
//! - **Actor per Worker**: a worker is one task with one inbox. It shares no
//!   state with the broker or with other workers; everything crosses the
//!   channel as an `Envelope`.
//! - **Scope, not Singletons**: what a worker learns on its first call (its own
//!   specifier) lives in a `WorkerScope` that is passed down to module
//!   factories and hooks.
//! - **Never Crash the Loop**: every failure inside a call, a panic included,
//!   becomes the error outcome of that call's result.
//!
//! ## Invariants
//!
//! - Each call is answered by exactly one result carrying the call's id.
//! - A module is instantiated once per distinct import URL. A new cache buster
//!   is a new import URL.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use futures::FutureExt;
use tokio::sync::OnceCell;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

use isowire::CallMessage;
use isowire::Envelope;
use isowire::ErrorValue;
use isowire::Message;
use isowire::Value;
use isowire::find_transferables;

use crate::call::CallError;
use crate::call::FUNCTION_NOT_FOUND;
use crate::context::IsolateCtx;
use crate::debug::debug_log;
use crate::hooks::CallHooks;
use crate::hooks::NoHooks;
use crate::module::ExportFn;
use crate::module::Exports;
use crate::module::Invocation;
use crate::module::ModuleCatalog;
use crate::module::ModuleContext;
use crate::port::PendingCalls;
use crate::port::Port;
use crate::port::PortResolver;
use crate::proxy::BrokerProxy;
use crate::specifier::WorkerSpecifier;
use crate::specifier::strip_fragment;
use crate::worker::WorkerHandle;

/// Builds and spawns worker isolates.
#[derive(Clone)]
pub struct WorkerRuntime {
    pub(crate) catalog: Arc<ModuleCatalog>,
    pub(crate) hooks: Arc<dyn CallHooks>,
    pub(crate) ctx: IsolateCtx,
}

impl WorkerRuntime {
    pub fn new(catalog: impl Into<Arc<ModuleCatalog>>) -> Self {
        Self {
            catalog: catalog.into(),
            hooks: Arc::new(NoHooks),
            ctx: IsolateCtx::default(),
        }
    }

    pub fn hooks(mut self, hooks: impl CallHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn ctx(mut self, ctx: IsolateCtx) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Starts a worker task. Must be called from within a tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(inbox_rx, outbox_tx));
        WorkerHandle::new(inbox_tx, outbox_rx, task.abort_handle())
    }

    async fn run(self, mut inbox: mpsc::UnboundedReceiver<Envelope>, outbox: mpsc::UnboundedSender<Envelope>) {
        let port = Port::new(outbox, Arc::new(PendingCalls::new()));
        let mut scope: Option<Arc<WorkerScope>> = None;
        // Dropping the set aborts the calls still running in it.
        let mut calls = JoinSet::new();

        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    match envelope.message {
                        Message::Result(result) => {
                            let call_id = result.id;
                            if !port.pending().resolve(result) {
                                tracing::debug!(%call_id, "worker received result for unknown call");
                            }
                        }
                        Message::Call(call) => {
                            let scope = scope
                                .get_or_insert_with(|| Arc::new(self.scope_for(&call, port.clone())))
                                .clone();
                            calls.spawn(scope.handle_call(call));
                        }
                    }
                }
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "worker call task failed");
                    }
                }
            }
        }
    }

    fn scope_for(&self, first_call: &CallMessage, port: Port) -> WorkerScope {
        let module = strip_fragment(&first_call.route.target_module);
        let specifier = WorkerSpecifier::from((module, first_call.route.target_segregation_id()));
        let broker = BrokerProxy::new(
            specifier.clone(),
            Arc::new(SelfResolver {
                port: port.clone(),
                ctx: self.ctx.clone(),
            }),
        );

        WorkerScope {
            specifier,
            broker,
            port,
            ctx: self.ctx.clone(),
            catalog: self.catalog.clone(),
            hooks: self.hooks.clone(),
            modules: tokio::sync::Mutex::new(HashMap::new()),
            globals: Mutex::new(anymap::Map::new()),
            initialized: OnceCell::new(),
        }
    }
}

/// Per-worker state, created when the first call arrives.
pub struct WorkerScope {
    specifier: WorkerSpecifier,
    broker: BrokerProxy,
    port: Port,
    ctx: IsolateCtx,
    catalog: Arc<ModuleCatalog>,
    hooks: Arc<dyn CallHooks>,
    modules: tokio::sync::Mutex<HashMap<Url, Arc<Exports>>>,
    globals: Mutex<anymap::Map<dyn anymap::any::Any + Send + Sync>>,
    initialized: OnceCell<()>,
}

impl WorkerScope {
    /// The module and segregation id of this worker's first call.
    pub fn specifier(&self) -> &WorkerSpecifier {
        &self.specifier
    }

    /// Proxy factory for calls out of this worker.
    pub fn broker(&self) -> BrokerProxy {
        self.broker.clone()
    }

    pub fn ctx(&self) -> &IsolateCtx {
        &self.ctx
    }

    pub fn global<T>(&self) -> T
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        let mut globals = self.globals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = globals.get::<T>() {
            return value.clone();
        }
        let value = T::default();
        globals.insert(value.clone());
        value
    }

    /// Number of module instances currently cached.
    pub async fn module_count(&self) -> usize {
        self.modules.lock().await.len()
    }

    async fn handle_call(self: Arc<Self>, mut call: CallMessage) {
        self.initialized
            .get_or_init(|| async {
                debug_log!("worker initialized as {}", self.specifier);
                let init = AssertUnwindSafe(self.hooks.initial_call(&self, &call)).catch_unwind();
                if let Err(panic) = init.await {
                    tracing::warn!(worker = %self.specifier, error = ?panic_value(panic), "initial call hook panicked");
                }
            })
            .await;

        debug_log!("worker received call: {:?}", call);

        let args = std::mem::take(&mut call.args);
        // Hooks may panic too; the caller still gets a result.
        let outcome = AssertUnwindSafe(self.import_and_call(&call, args))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_value(panic)));
        let result = call.reply(outcome);
        let transfer = match &result.outcome {
            Ok(value) | Err(value) => find_transferables([value]),
        };

        debug_log!("worker sending result: {:?}", result);

        if self.port.post_message(Envelope::new(result, transfer)).is_err() {
            tracing::debug!(call_id = %call.id, "worker outbox closed, result dropped");
        }
    }

    async fn import(&self, url: &Url) -> Result<Arc<Exports>, Value> {
        let mut modules = self.modules.lock().await;
        if let Some(exports) = modules.get(url) {
            return Ok(exports.clone());
        }

        let factory = self.catalog.get(url).ok_or_else(|| {
            Value::Error(ErrorValue::new("TypeError", format!("Module not found \"{}\"", url)))
        })?;
        let exports = Arc::new(factory(&ModuleContext { url, scope: self }));
        modules.insert(url.clone(), exports.clone());
        Ok(exports)
    }

    async fn import_and_call(&self, call: &CallMessage, args: Vec<Value>) -> Result<Value, Value> {
        let telemetry = self.ctx.telemetry();
        let marshal = self.ctx.marshal();

        let import_url = call.import_url();
        let exports = telemetry
            .msg_span("import", call)
            .instrument(self.import(&import_url))
            .await?;

        let Some(function_name) = call.function_name() else {
            return Ok(Value::Null);
        };
        let Some(function) = exports.get(function_name) else {
            return Err(Value::from(FUNCTION_NOT_FOUND));
        };

        let args = marshal
            .unmarshal_args(args)
            .await
            .map_err(|e| Value::Error(e.into()))?;
        let invocation = Invocation {
            id: call.id,
            route: call.route.clone(),
            function_name: function_name.to_string(),
        };

        let span = telemetry.msg_span("call", call);
        let outcome = span.instrument(self.invoke(call, function, invocation, args)).await;

        match outcome {
            Ok(value) => marshal.marshal(value).await.map_err(|e| Value::Error(e.into())),
            Err(error) => Err(marshal
                .marshal(error)
                .await
                .unwrap_or_else(|e| Value::Error(e.into()))),
        }
    }

    async fn invoke(
        &self,
        call: &CallMessage,
        function: ExportFn,
        invocation: Invocation,
        args: Vec<Value>,
    ) -> Result<Value, Value> {
        let outcome = match self.hooks.before_call(call).await {
            Ok(()) => AssertUnwindSafe(function(invocation, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_value(panic))),
            Err(error) => Err(error),
        };

        let outcome = match outcome {
            Ok(value) => Ok(value),
            Err(error) => match self.hooks.on_error(call, &error).await {
                Some(value) => Ok(value),
                None => Err(error),
            },
        };

        self.hooks.after_call(call).await;
        outcome
    }
}

fn panic_value(panic: Box<dyn Any + Send>) -> Value {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "function panicked".to_string());
    Value::Error(ErrorValue::new("Panic", message))
}

/// Resolves every target to the worker's own outbound port; the broker on the
/// other end routes the call.
struct SelfResolver {
    port: Port,
    ctx: IsolateCtx,
}

impl PortResolver for SelfResolver {
    fn resolve(&self, _module: &Url, _segregation_id: Option<&str>) -> Result<Port, CallError> {
        Ok(self.port.clone())
    }

    fn ctx(&self) -> &IsolateCtx {
        &self.ctx
    }
}

//! # Worker broker
//!
//! Registry of live workers, keyed by (module, segregation id), and the entry
//! point for calling into them.
//!
//! ## Philosophy
//!
//! - **Sole Authority**: the broker is the only place workers are created,
//!   reused and forgotten. Everything else holds short-lived handles.
//! - **Pluggable Policy**: how a worker is built, how it is keyed and when it
//!   is evicted are all injected. The broker validates nothing itself.
//! - **Observer, not Owner**: the lifecycle cleaner sees every create, get and
//!   remove, and may call back into the broker to evict.
//!
//! ## Invariants
//!
//! - Two lookups producing the same key return the same worker until it is
//!   removed; different keys never share a worker.
//! - Cache busters change the imported module URL, never the worker key.
//! - Removing a worker detaches it but does not terminate it.
//! - No registry lock is held while the cleaner runs.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use url::Url;

use isowire::CallMessage;
use isowire::MarshalRegistry;
use isowire::Value;

use crate::call;
use crate::call::CallError;
use crate::call::relay_call;
use crate::context::IsolateCtx;
use crate::debug::debug_log;
use crate::hooks::CallHooks;
use crate::hooks::NoHooks;
use crate::isolate::WorkerRuntime;
use crate::module::ModuleCatalog;
use crate::port::Port;
use crate::port::PortResolver;
use crate::proxy;
use crate::proxy::WorkerFn;
use crate::proxy::WorkerProxy;
use crate::specifier::WorkerSpecifier;
use crate::specifier::default_worker_key;
use crate::specifier::strip_fragment;
use crate::telemetry::NoopTelemetry;
use crate::telemetry::Telemetry;
use crate::worker::MessageHandler;
use crate::worker::WorkerHandle;

/// Configuration errors raised by worker constructors and key suppliers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// No such module can be loaded into a worker.
    InvalidModule(String),
    /// The constructor or key supplier refused the request.
    Rejected(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModule(module) => write!(f, "Invalid worker module: {}", module),
            Self::Rejected(reason) => write!(f, "Worker rejected: {}", reason),
        }
    }
}

impl std::error::Error for WorkerError {}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Builds a new worker for a module and optional segregation id.
pub type WorkerConstructor = Arc<dyn Fn(&Url, Option<&str>) -> Result<WorkerHandle> + Send + Sync>;

/// Computes the registry key for a module and optional segregation id.
pub type WorkerKeySupplier = Arc<dyn Fn(&Url, Option<&str>) -> Result<String> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerEventKind {
    Create,
    Get,
    Remove,
}

/// A lifecycle change of one worker.
///
/// `worker` is only valid for the duration of the callback; index by `key`.
pub struct WorkerEvent<'a> {
    pub kind: WorkerEventKind,
    pub key: &'a str,
    pub worker: &'a WorkerHandle,
    pub module: &'a Url,
    pub segregation_id: Option<&'a str>,
    pub broker: &'a WorkerBroker,
}

pub enum LifecycleEvent<'a> {
    Worker(WorkerEvent<'a>),
    /// Every worker was terminated.
    Terminate { broker: &'a WorkerBroker },
}

/// Observes worker lifecycle events, typically to evict idle workers.
pub trait WorkerCleaner: Send + Sync + 'static {
    fn on_event(&self, event: &LifecycleEvent<'_>);
}

impl<F> WorkerCleaner for F
where
    F: Fn(&LifecycleEvent<'_>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &LifecycleEvent<'_>) {
        self(event)
    }
}

struct BrokerInner {
    workers: DashMap<String, WorkerHandle>,
    cache_busters: DashMap<Url, String>,
    constructor: WorkerConstructor,
    key_supplier: Option<WorkerKeySupplier>,
    cleaner: Option<Arc<dyn WorkerCleaner>>,
    ctx: IsolateCtx,
    handler: Arc<dyn MessageHandler>,
}

/// The worker registry. Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct WorkerBroker {
    inner: Arc<BrokerInner>,
}

impl WorkerBroker {
    /// A broker whose workers can import nothing. See `builder`.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> WorkerBrokerBuilder {
        WorkerBrokerBuilder::new()
    }

    pub fn ctx(&self) -> &IsolateCtx {
        &self.inner.ctx
    }

    /// The registry key for a module and segregation id.
    pub fn worker_key(&self, module: &Url, segregation_id: Option<&str>) -> Result<String> {
        match &self.inner.key_supplier {
            Some(supplier) => supplier(module, segregation_id),
            None => Ok(default_worker_key(module, segregation_id)),
        }
    }

    /// Returns the worker registered for the key of `module` and
    /// `segregation_id`, constructing and registering one if there is none.
    pub fn get_worker(&self, module: &Url, segregation_id: Option<&str>) -> Result<WorkerHandle> {
        let key = self.worker_key(module, segregation_id)?;

        let existing = self.inner.workers.get(&key).map(|entry| entry.value().clone());
        let (worker, kind) = match existing {
            Some(worker) => (worker, WorkerEventKind::Get),
            None => {
                let created = (self.inner.constructor)(module, segregation_id)?;
                match self.inner.workers.entry(key.clone()) {
                    // Lost a race with another caller; theirs wins.
                    Entry::Occupied(entry) => {
                        created.terminate();
                        (entry.get().clone(), WorkerEventKind::Get)
                    }
                    Entry::Vacant(entry) => {
                        created.attach_handler(self.inner.handler.clone());
                        entry.insert(created.clone());
                        tracing::debug!(%key, worker = %created.id(), "worker created");
                        (created, WorkerEventKind::Create)
                    }
                }
            }
        };

        self.notify(LifecycleEvent::Worker(WorkerEvent {
            kind,
            key: &key,
            worker: &worker,
            module,
            segregation_id,
            broker: self,
        }));
        Ok(worker)
    }

    /// Forgets the worker for `module` and `segregation_id`, returning it.
    ///
    /// The worker is detached but keeps running; terminating it is up to the
    /// caller or the cleaner.
    pub fn remove_worker(&self, module: &Url, segregation_id: Option<&str>) -> Result<Option<WorkerHandle>> {
        let key = self.worker_key(module, segregation_id)?;
        let Some((key, worker)) = self.inner.workers.remove(&key) else {
            return Ok(None);
        };
        worker.detach_handler();
        tracing::debug!(%key, worker = %worker.id(), "worker removed");

        self.notify(LifecycleEvent::Worker(WorkerEvent {
            kind: WorkerEventKind::Remove,
            key: &key,
            worker: &worker,
            module,
            segregation_id,
            broker: self,
        }));
        Ok(Some(worker))
    }

    /// Terminates and forgets every worker. Safe to call more than once.
    pub fn terminate(&self) {
        let keys: Vec<String> = self.inner.workers.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((key, worker)) = self.inner.workers.remove(&key) {
                worker.detach_handler();
                worker.terminate();
                tracing::debug!(%key, worker = %worker.id(), "worker terminated");
            }
        }
        self.notify(LifecycleEvent::Terminate { broker: self });
    }

    pub fn len(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.workers.is_empty()
    }

    pub fn contains_worker(&self, module: &Url, segregation_id: Option<&str>) -> bool {
        self.worker_key(module, segregation_id)
            .map(|key| self.inner.workers.contains_key(&key))
            .unwrap_or(false)
    }

    /// Forces later calls to import `module` under `token` as URL fragment.
    pub fn set_cache_buster(&self, module: &Url, token: impl Into<String>) {
        self.inner.cache_busters.insert(strip_fragment(module), token.into());
    }

    pub fn cache_buster(&self, module: &Url) -> Option<String> {
        self.inner
            .cache_busters
            .get(&strip_fragment(module))
            .map(|entry| entry.value().clone())
    }

    pub fn worker_fn_proxy(&self, target: impl Into<WorkerSpecifier>, function_name: &str) -> call::Result<WorkerFn> {
        WorkerFn::new(None, &target.into(), Some(function_name.to_string()), self.resolver())
    }

    pub fn worker_proxy(&self, target: impl Into<WorkerSpecifier>) -> call::Result<WorkerProxy> {
        WorkerProxy::new(None, &target.into(), self.resolver())
    }

    /// Makes the target worker import its module without calling anything.
    ///
    /// With a `cache_buster`, the token is recorded for the module first, so
    /// this import and every later call load a fresh instance of it.
    pub async fn worker_import(
        &self,
        target: impl Into<WorkerSpecifier>,
        cache_buster: Option<String>,
    ) -> call::Result<Value> {
        let target = target.into();
        if let Some(token) = cache_buster {
            let module = target.resolve(None)?;
            self.set_cache_buster(&module, token);
        }
        proxy::worker_import(None, &target, self.resolver()).await
    }

    fn resolver(&self) -> Arc<dyn PortResolver> {
        Arc::new(self.clone())
    }

    fn notify(&self, event: LifecycleEvent<'_>) {
        if let Some(cleaner) = &self.inner.cleaner {
            cleaner.on_event(&event);
        }
    }
}

impl Default for WorkerBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkerBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBroker")
            .field("workers", &self.inner.workers.len())
            .field("cache_busters", &self.inner.cache_busters.len())
            .finish()
    }
}

impl PortResolver for WorkerBroker {
    fn resolve(&self, module: &Url, segregation_id: Option<&str>) -> call::Result<Port> {
        let worker = self.get_worker(module, segregation_id).map_err(CallError::Worker)?;
        Ok(worker.port().clone())
    }

    fn cache_buster(&self, module: &Url) -> Option<String> {
        WorkerBroker::cache_buster(self, module)
    }

    fn ctx(&self) -> &IsolateCtx {
        &self.inner.ctx
    }
}

/// Relays calls made from inside workers. Holds the broker weakly so the
/// workers it is attached to do not keep the broker alive.
struct BrokerHandler {
    broker: Weak<BrokerInner>,
}

impl MessageHandler for BrokerHandler {
    fn on_call(&self, call: CallMessage) {
        if !call.route.is_from_worker() {
            return;
        }
        let Some(inner) = self.broker.upgrade() else {
            debug_log!("broker gone, dropping relayed call {}", call.id);
            return;
        };
        let broker = WorkerBroker { inner };
        tokio::spawn(async move { relay_call(call, &broker).await });
    }
}

pub struct WorkerBrokerBuilder {
    catalog: ModuleCatalog,
    hooks: Arc<dyn CallHooks>,
    constructor: Option<WorkerConstructor>,
    key_supplier: Option<WorkerKeySupplier>,
    cleaner: Option<Arc<dyn WorkerCleaner>>,
    telemetry: Arc<dyn Telemetry>,
    marshal: MarshalRegistry,
}

impl WorkerBrokerBuilder {
    pub fn new() -> Self {
        Self {
            catalog: ModuleCatalog::new(),
            hooks: Arc::new(NoHooks),
            constructor: None,
            key_supplier: None,
            cleaner: None,
            telemetry: Arc::new(NoopTelemetry),
            marshal: MarshalRegistry::new(),
        }
    }

    /// Modules available to workers built by the default constructor.
    pub fn catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Hooks installed in workers built by the default constructor.
    pub fn hooks(mut self, hooks: impl CallHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replaces the default constructor, which spawns a `WorkerRuntime` over
    /// the catalog and rejects modules missing from it.
    pub fn worker_constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&Url, Option<&str>) -> Result<WorkerHandle> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    pub fn worker_key_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn(&Url, Option<&str>) -> Result<String> + Send + Sync + 'static,
    {
        self.key_supplier = Some(Arc::new(supplier));
        self
    }

    pub fn worker_cleaner(mut self, cleaner: impl WorkerCleaner) -> Self {
        self.cleaner = Some(Arc::new(cleaner));
        self
    }

    pub fn telemetry(mut self, telemetry: impl Telemetry) -> Self {
        self.telemetry = Arc::new(telemetry);
        self
    }

    pub fn marshal(mut self, marshal: MarshalRegistry) -> Self {
        self.marshal = marshal;
        self
    }

    pub fn build(self) -> WorkerBroker {
        let ctx = IsolateCtx::new(self.marshal, self.telemetry);
        let constructor = match self.constructor {
            Some(constructor) => constructor,
            None => default_constructor(WorkerRuntime {
                catalog: Arc::new(self.catalog),
                hooks: self.hooks,
                ctx: ctx.clone(),
            }),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<BrokerInner>| BrokerInner {
            workers: DashMap::new(),
            cache_busters: DashMap::new(),
            constructor,
            key_supplier: self.key_supplier,
            cleaner: self.cleaner,
            ctx,
            handler: Arc::new(BrokerHandler { broker: weak.clone() }),
        });
        WorkerBroker { inner }
    }
}

impl Default for WorkerBrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_constructor(runtime: WorkerRuntime) -> WorkerConstructor {
    Arc::new(move |module: &Url, _segregation_id: Option<&str>| {
        if !runtime.catalog().contains(module) {
            return Err(WorkerError::InvalidModule(module.to_string()));
        }
        Ok(runtime.clone().spawn())
    })
}

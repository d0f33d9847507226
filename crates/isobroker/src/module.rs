//! # Module catalog
//!
//! Workers cannot load code at runtime, so every module a worker may import
//! is registered up front: its URL maps to a factory that builds the module's
//! exported functions. Instantiating a module means running its factory; any
//! state the factory creates is module state and is reset when the module is
//! imported again under a new cache buster.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use url::Url;
use uuid::Uuid;

use isowire::Route;
use isowire::Value;

use crate::isolate::WorkerScope;
use crate::proxy::BrokerProxy;
use crate::specifier::WorkerSpecifier;
use crate::specifier::strip_fragment;

pub type ExportFuture = BoxFuture<'static, Result<Value, Value>>;

/// An exported function: invocation details plus unmarshalled args.
pub type ExportFn = Arc<dyn Fn(Invocation, Vec<Value>) -> ExportFuture + Send + Sync>;

pub type ModuleFactory = Arc<dyn Fn(&ModuleContext<'_>) -> Exports + Send + Sync>;

/// What an exported function knows about the call that reached it.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub id: Uuid,
    pub route: Route,
    pub function_name: String,
}

impl Invocation {
    /// The calling worker, for calls relayed out of another worker.
    pub fn source(&self) -> Option<WorkerSpecifier> {
        let module = self.route.source_module.as_ref()?;
        Some(WorkerSpecifier::from((module, self.route.source_segregation_id())))
    }
}

/// The functions a module instance exports.
#[derive(Clone, Default)]
pub struct Exports {
    functions: HashMap<String, ExportFn>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Invocation, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        let export: ExportFn = Arc::new(move |invocation: Invocation, args: Vec<Value>| -> ExportFuture {
            Box::pin(f(invocation, args))
        });
        self.functions.insert(name.to_string(), export);
        self
    }

    pub fn get(&self, name: &str) -> Option<ExportFn> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Handed to a module factory while the module is instantiated.
pub struct ModuleContext<'a> {
    pub(crate) url: &'a Url,
    pub(crate) scope: &'a WorkerScope,
}

impl ModuleContext<'_> {
    /// The URL the module was imported under, cache buster included.
    pub fn url(&self) -> &Url {
        self.url
    }

    /// The worker this module was instantiated in.
    pub fn worker(&self) -> &WorkerSpecifier {
        self.scope.specifier()
    }

    /// Proxy factory for calling other workers, with this worker as the source.
    pub fn broker(&self) -> BrokerProxy {
        self.scope.broker()
    }

    /// Worker-wide state of type `T`, shared by every module in the worker.
    ///
    /// Created from `T::default()` on first use. Use a shared type
    /// (`Arc<Mutex<_>>`, say) for state that must be mutated.
    pub fn global<T>(&self) -> T
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        self.scope.global::<T>()
    }
}

/// Static table of importable modules, keyed by URL without fragment.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<Url, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module<F>(mut self, url: Url, factory: F) -> Self
    where
        F: Fn(&ModuleContext<'_>) -> Exports + Send + Sync + 'static,
    {
        self.insert(url, factory);
        self
    }

    pub fn insert<F>(&mut self, url: Url, factory: F)
    where
        F: Fn(&ModuleContext<'_>) -> Exports + Send + Sync + 'static,
    {
        self.modules.insert(strip_fragment(&url), Arc::new(factory));
    }

    /// The factory for `url`, whatever its fragment.
    pub fn get(&self, url: &Url) -> Option<ModuleFactory> {
        self.modules.get(&strip_fragment(url)).cloned()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.modules.contains_key(&strip_fragment(url))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.modules.keys().map(Url::as_str)).finish()
    }
}

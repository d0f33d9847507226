//! # Proxy factory
//!
//! Local stand-ins for functions in other workers. A `WorkerFn` is one remote
//! function; a `WorkerProxy` hands out a cached `WorkerFn` for any name, so a
//! misspelt name only shows up as a function-not-found error when called.
//! `BrokerProxy` is the same factory as seen from inside a worker, with that
//! worker as the implicit source of every call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use url::Url;

use isowire::CallMessage;
use isowire::Route;
use isowire::Value;

use crate::call::Result;
use crate::call::call_worker_fn;
use crate::port::PortResolver;
use crate::specifier::WorkerSpecifier;
use crate::specifier::routing;

/// A callable reference to one function of a worker module.
#[derive(Clone)]
pub struct WorkerFn {
    route: Route,
    function_name: Option<String>,
    resolver: Arc<dyn PortResolver>,
}

impl WorkerFn {
    pub(crate) fn new(
        source: Option<&WorkerSpecifier>,
        target: &WorkerSpecifier,
        function_name: Option<String>,
        resolver: Arc<dyn PortResolver>,
    ) -> Result<Self> {
        Ok(Self {
            route: routing(source, target)?,
            function_name,
            resolver,
        })
    }

    /// The absolute target module.
    pub fn target(&self) -> &Url {
        &self.route.target_module
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    /// Calls the function. Every call gets a fresh id and the cache buster
    /// current at the time of the call.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let mut route = self.route.clone();
        route.cache_buster = self.resolver.cache_buster(&route.target_module);

        let mut msg = CallMessage::new(route, self.function_name.clone(), args);
        msg.context = self.resolver.ctx().telemetry().marshal_context();

        call_worker_fn(msg, self.resolver.as_ref()).await
    }
}

impl fmt::Debug for WorkerFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerFn")
            .field("target", &self.route.target_module.as_str())
            .field("function_name", &self.function_name)
            .finish()
    }
}

/// All functions of one worker module, by name.
pub struct WorkerProxy {
    template: WorkerFn,
    functions: Mutex<HashMap<String, WorkerFn>>,
}

impl WorkerProxy {
    pub(crate) fn new(
        source: Option<&WorkerSpecifier>,
        target: &WorkerSpecifier,
        resolver: Arc<dyn PortResolver>,
    ) -> Result<Self> {
        Ok(Self {
            template: WorkerFn::new(source, target, None, resolver)?,
            functions: Mutex::new(HashMap::new()),
        })
    }

    pub fn target(&self) -> &Url {
        self.template.target()
    }

    /// The function called `name`. Not checked until it is called.
    pub fn function(&self, name: &str) -> WorkerFn {
        let mut functions = self.functions.lock().unwrap_or_else(PoisonError::into_inner);
        functions
            .entry(name.to_string())
            .or_insert_with(|| WorkerFn {
                function_name: Some(name.to_string()),
                ..self.template.clone()
            })
            .clone()
    }

    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.function(name).call(args).await
    }
}

impl fmt::Debug for WorkerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProxy")
            .field("target", &self.target().as_str())
            .finish()
    }
}

/// Makes `target` import its module without calling anything.
pub(crate) async fn worker_import(
    source: Option<&WorkerSpecifier>,
    target: &WorkerSpecifier,
    resolver: Arc<dyn PortResolver>,
) -> Result<Value> {
    WorkerFn::new(source, target, None, resolver)?.call(Vec::new()).await
}

/// The proxy factory available to code running inside a worker.
///
/// Calls are posted to the worker's own outbound channel and routed by the
/// broker. Relative targets resolve against this worker's module.
#[derive(Clone)]
pub struct BrokerProxy {
    source: WorkerSpecifier,
    resolver: Arc<dyn PortResolver>,
}

impl BrokerProxy {
    pub(crate) fn new(source: WorkerSpecifier, resolver: Arc<dyn PortResolver>) -> Self {
        Self { source, resolver }
    }

    pub fn source(&self) -> &WorkerSpecifier {
        &self.source
    }

    pub fn worker_fn_proxy(&self, target: impl Into<WorkerSpecifier>, function_name: &str) -> Result<WorkerFn> {
        WorkerFn::new(
            Some(&self.source),
            &target.into(),
            Some(function_name.to_string()),
            self.resolver.clone(),
        )
    }

    pub fn worker_proxy(&self, target: impl Into<WorkerSpecifier>) -> Result<WorkerProxy> {
        WorkerProxy::new(Some(&self.source), &target.into(), self.resolver.clone())
    }

    pub async fn worker_import(&self, target: impl Into<WorkerSpecifier>) -> Result<Value> {
        worker_import(Some(&self.source), &target.into(), self.resolver.clone()).await
    }
}

impl fmt::Debug for BrokerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerProxy").field("source", &self.source).finish()
    }
}

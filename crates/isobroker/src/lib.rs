//! # Isobroker
//!
//! A broker for a pool of isolated workers. Each worker is a task reachable
//! only through its channel; the broker creates and reuses workers by
//! (module, segregation id), routes calls into them, relays calls they make to
//! each other, and marshals what crosses the boundary.
//!
//! ```text
//! WorkerFn::call ──▶ call_worker_fn ──▶ WorkerBroker::get_worker ──▶ inbox
//!                                                                     │
//!        result ◀── pending table ◀── pump ◀── outbox ◀── WorkerScope ┘
//! ```

pub mod broker;
pub mod call;
pub mod cleaner;
pub mod context;
pub mod debug;
pub mod hooks;
pub mod isolate;
pub mod module;
pub mod port;
pub mod proxy;
pub mod specifier;
pub mod telemetry;
pub mod worker;

pub use broker::LifecycleEvent;
pub use broker::WorkerBroker;
pub use broker::WorkerCleaner;
pub use broker::WorkerError;
pub use broker::WorkerEvent;
pub use broker::WorkerEventKind;
pub use call::CallError;
pub use call::FUNCTION_NOT_FOUND;
pub use call::call_worker_fn;
pub use cleaner::CleanerOptions;
pub use cleaner::LruCleaner;
pub use debug::Debugging;
pub use debug::enable_debugging;
pub use hooks::CallHooks;
pub use isolate::WorkerRuntime;
pub use isolate::WorkerScope;
pub use module::Exports;
pub use module::Invocation;
pub use module::ModuleCatalog;
pub use module::ModuleContext;
pub use proxy::BrokerProxy;
pub use proxy::WorkerFn;
pub use proxy::WorkerProxy;
pub use specifier::WorkerSpecifier;
pub use telemetry::Telemetry;
pub use worker::WorkerHandle;

pub use isowire;

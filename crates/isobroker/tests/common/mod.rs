//! Demo worker modules shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use url::Url;

use isobroker::BrokerProxy;
use isobroker::CallError;
use isobroker::Exports;
use isobroker::Invocation;
use isobroker::ModuleCatalog;
use isobroker::WorkerProxy;
use isobroker::isowire::Value;
use isobroker::isowire::body;

pub const BASE: &str = "file:///workers/";

pub fn module(name: &str) -> Url {
    Url::parse(BASE)
        .and_then(|base| base.join(name))
        .expect("valid module url")
}

pub fn forbidden() -> body::Response {
    http::Response::builder()
        .status(403)
        .body(body::empty())
        .expect("valid response")
}

fn arg_str(args: &[Value], index: usize) -> String {
    args.get(index).and_then(Value::as_str).unwrap_or_default().to_string()
}

#[derive(Clone, Default)]
pub struct SiblingState(Arc<Mutex<String>>);

/// Calls `function` of the worker at `target`, from inside a worker.
async fn relay(broker: BrokerProxy, target: &'static str, function: &'static str, args: Vec<Value>) -> Result<Value, Value> {
    let proxy = broker.worker_proxy(target).map_err(CallError::into_value)?;
    proxy.call(function, args).await.map_err(CallError::into_value)
}

fn multiply(args: &[Value]) -> Result<Value, Value> {
    let params = args.first().ok_or_else(|| Value::error("missing params"))?;
    let thing = params
        .get("thing")
        .and_then(Value::as_bytes)
        .ok_or_else(|| Value::error("missing thing"))?;
    let multiplier = params.get("multiplier").and_then(Value::as_i64).unwrap_or(1);
    let scaled: Vec<u8> = thing.iter().map(|b| (i64::from(*b) * multiplier) as u8).collect();
    Ok(Value::from(scaled))
}

/// Every demo module.
pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .module(module("other.rs"), |_| {
            Exports::new()
                .function("getWelcome", |_, args| async move {
                    Ok(Value::from(format!("Hello {}", arg_str(&args, 0))))
                })
                .function("manyThings", |_, _| async {
                    Ok(Value::List(vec!["one".into(), "two".into(), "three".into()]))
                })
        })
        .module(module("gubbins.rs"), |ctx| {
            let broker = ctx.broker();
            Exports::new()
                .function("hello", move |_, args| relay(broker.clone(), "./other.rs", "getWelcome", args))
                .function("bad", |_, _| async { Err(Value::error("bad things happen")) })
                .function("nothing", |_, _| async { Ok(Value::Null) })
        })
        .module(module("stateful.rs"), |_| {
            let state = Arc::new(Mutex::new(String::new()));
            let get = state.clone();
            Exports::new()
                .function("setState", move |_, args| {
                    let state = state.clone();
                    async move {
                        *state.lock().expect("state lock") = arg_str(&args, 0);
                        Ok(Value::Null)
                    }
                })
                .function("getState", move |_, _| {
                    let state = get.clone();
                    async move { Ok(Value::from(state.lock().expect("state lock").clone())) }
                })
        })
        .module(module("reader.rs"), |ctx| {
            let broker = ctx.broker();
            Exports::new().function("getState", move |_, args| relay(broker.clone(), "./stateful.rs", "getState", args))
        })
        .module(module("responses.rs"), |_| {
            Exports::new()
                .function("throwForbidden", |_, _| async { Err(Value::object(forbidden())) })
                .function("returnForbidden", |_, _| async { Ok(Value::object(forbidden())) })
        })
        .module(module("proxy_responses.rs"), |ctx| {
            let broker = ctx.broker();
            let forward = move |name: &'static str| {
                let broker = broker.clone();
                move |_: Invocation, args: Vec<Value>| relay(broker.clone(), "./responses.rs", name, args)
            };
            Exports::new()
                .function("throwForbidden", forward("throwForbidden"))
                .function("returnForbidden", forward("returnForbidden"))
        })
        .module(module("transfer_service.rs"), |_| {
            Exports::new().function("service", |_, args| async move { multiply(&args) })
        })
        .module(module("transfer_client.rs"), |ctx| {
            let broker = ctx.broker();
            Exports::new().function("client", move |_, mut args| {
                let multiplier = args.pop().unwrap_or_default();
                let thing = args.pop().unwrap_or_default();
                let params: Value = [("thing".to_string(), thing), ("multiplier".to_string(), multiplier)]
                    .into_iter()
                    .collect();
                relay(broker.clone(), "./transfer_service.rs", "service", vec![params])
            })
        })
        .module(module("error.rs"), |_| {
            Exports::new().function("throwError", |_, _| async { Err(Value::error("Something went wrong")) })
        })
        .module(module("sibling_one.rs"), |ctx| {
            let state = ctx.global::<SiblingState>();
            Exports::new().function("setState", move |_, args| {
                let state = state.clone();
                async move {
                    *state.0.lock().expect("sibling lock") = arg_str(&args, 0);
                    Ok(Value::Null)
                }
            })
        })
        .module(module("sibling_two.rs"), |ctx| {
            let state = ctx.global::<SiblingState>();
            Exports::new().function("getState", move |_, _| {
                let state = state.clone();
                async move { Ok(Value::from(state.0.lock().expect("sibling lock").clone())) }
            })
        })
        .module(module("ping.rs"), |ctx| {
            let broker = ctx.broker();
            Exports::new()
                .function("start", move |_, args| relay(broker.clone(), "./pong.rs", "bounce", args))
                .function("leaf", |_, args| async move { Ok(Value::from(format!("leaf {}", arg_str(&args, 0)))) })
        })
        .module(module("pong.rs"), |ctx| {
            let broker = ctx.broker();
            Exports::new().function("bounce", move |_, args| relay(broker.clone(), "./ping.rs", "leaf", args))
        })
        .module(module("storage.rs"), |_| {
            let stores: Arc<Mutex<HashMap<String, HashMap<String, String>>>> = Arc::default();
            let get_stores = stores.clone();
            Exports::new()
                .function("put", move |invocation, args| {
                    let stores = stores.clone();
                    async move {
                        let Some(source) = invocation.source() else {
                            return Ok(Value::Null);
                        };
                        let value = arg_str(&args, 1);
                        stores
                            .lock()
                            .expect("stores lock")
                            .entry(source.to_string())
                            .or_default()
                            .insert(arg_str(&args, 0), value.clone());
                        Ok(Value::from(value))
                    }
                })
                .function("get", move |invocation, args| {
                    let stores = get_stores.clone();
                    async move {
                        let Some(source) = invocation.source() else {
                            return Ok(Value::Null);
                        };
                        let stores = stores.lock().expect("stores lock");
                        let value = stores.get(&source.to_string()).and_then(|s| s.get(&arg_str(&args, 0)));
                        Ok(Value::from(value.cloned()))
                    }
                })
        })
        .module(module("storage_client.rs"), |ctx| {
            let broker = ctx.broker();
            let forward = move |name: &'static str| {
                let broker = broker.clone();
                move |_: Invocation, args: Vec<Value>| relay(broker.clone(), "./storage.rs", name, args)
            };
            Exports::new().function("save", forward("put")).function("load", forward("get"))
        })
}

/// A hand-written typed adapter over the `stateful.rs` module.
pub struct Stateful {
    proxy: WorkerProxy,
}

impl Stateful {
    pub fn new(proxy: WorkerProxy) -> Self {
        Self { proxy }
    }

    pub async fn set_state(&self, state: &str) -> Result<(), CallError> {
        self.proxy.call("setState", vec![Value::from(state)]).await?;
        Ok(())
    }

    pub async fn get_state(&self) -> Result<String, CallError> {
        let state = self.proxy.call("getState", Vec::new()).await?;
        Ok(state.as_str().unwrap_or_default().to_string())
    }
}

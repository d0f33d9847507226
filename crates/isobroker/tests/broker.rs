//! Calls through the broker into the demo workers.

mod common;

use isobroker::CallError;
use isobroker::WorkerBroker;
use isobroker::WorkerSpecifier;
use isobroker::isowire::Value;
use isobroker::isowire::body;

use common::Stateful;
use common::catalog;
use common::module;

fn broker() -> WorkerBroker {
    WorkerBroker::builder().catalog(catalog()).build()
}

fn status_of(value: Value) -> u16 {
    let response = value.downcast::<body::Response>().expect("a response object");
    response.status().as_u16()
}

#[tokio::test]
async fn test_fn_proxy() {
    let broker = broker();
    let get_welcome = broker
        .worker_fn_proxy(module("other.rs"), "getWelcome")
        .expect("proxy");

    let welcome = get_welcome.call(vec![Value::from("World")]).await.expect("call");

    assert_eq!(welcome, Value::from("Hello World"));
    broker.terminate();
}

#[tokio::test]
async fn test_worker_proxy_returns_lists() {
    let broker = broker();
    let other = broker.worker_proxy(module("other.rs")).expect("proxy");

    let things = other.call("manyThings", Vec::new()).await.expect("call");

    assert_eq!(things, Value::List(vec!["one".into(), "two".into(), "three".into()]));
    broker.terminate();
}

#[tokio::test]
async fn test_pair_of_workers() {
    let broker = broker();
    let gubbins = broker.worker_proxy(module("gubbins.rs")).expect("proxy");

    let hello = gubbins.call("hello", vec![Value::from("World")]).await.expect("call");

    assert_eq!(hello, Value::from("Hello World"));
    assert!(broker.contains_worker(&module("gubbins.rs"), None));
    assert!(broker.contains_worker(&module("other.rs"), None));
    assert_eq!(broker.len(), 2);
    broker.terminate();
}

#[tokio::test]
async fn test_call_back_into_caller() {
    let broker = broker();
    let ping = broker.worker_fn_proxy(module("ping.rs"), "start").expect("proxy");

    let result = ping.call(vec![Value::from("round trip")]).await.expect("call");

    assert_eq!(result, Value::from("leaf round trip"));
    assert_eq!(broker.len(), 2);
    broker.terminate();
}

#[tokio::test]
async fn test_thrown_error() {
    let broker = broker();
    let gubbins = broker.worker_proxy(module("gubbins.rs")).expect("proxy");

    let err = gubbins.call("bad", Vec::new()).await.expect_err("bad throws");

    assert_eq!(err.into_remote(), Some(Value::error("bad things happen")));
    broker.terminate();
}

#[tokio::test]
async fn test_undefined_result() {
    let broker = broker();
    let gubbins = broker.worker_proxy(module("gubbins.rs")).expect("proxy");

    let nothing = gubbins.call("nothing", Vec::new()).await.expect("call");

    assert!(nothing.is_null());
    broker.terminate();
}

#[tokio::test]
async fn test_misspelt_function() {
    let broker = broker();
    let gubbins = broker.worker_proxy(module("gubbins.rs")).expect("proxy");

    let err = gubbins.call("helo", Vec::new()).await.expect_err("no such function");

    assert!(err.is_function_not_found(), "{}", err);
    broker.terminate();
}

#[tokio::test]
async fn test_unknown_module() {
    let broker = broker();
    let proxy = broker.worker_fn_proxy(module("missing.rs"), "anything").expect("proxy");

    let err = proxy.call(Vec::new()).await.expect_err("not in the catalog");

    assert!(matches!(err, CallError::Worker(_)), "{}", err);
    assert!(broker.is_empty());
}

#[tokio::test]
async fn test_relative_target_needs_a_source() {
    let broker = broker();
    let err = broker.worker_proxy("./other.rs").expect_err("no base to resolve against");
    assert!(matches!(err, CallError::Specifier(_)), "{}", err);
}

#[tokio::test]
async fn test_shared_worker() {
    let broker = broker();
    let first = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));
    let second = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));

    first.set_state("shared").await.expect("set");

    assert_eq!(second.get_state().await.expect("get"), "shared");
    assert_eq!(broker.len(), 1);
    broker.terminate();
}

#[tokio::test]
async fn test_segregated_workers() {
    let broker = broker();
    let plain = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));
    let segregated = Stateful::new(
        broker
            .worker_proxy(WorkerSpecifier::new(module("stateful.rs")).segregated("tenant-a"))
            .expect("proxy"),
    );

    plain.set_state("plain").await.expect("set");
    segregated.set_state("segregated").await.expect("set");

    assert_eq!(plain.get_state().await.expect("get"), "plain");
    assert_eq!(segregated.get_state().await.expect("get"), "segregated");
    assert_eq!(broker.len(), 2);
    broker.terminate();
}

#[tokio::test]
async fn test_cache_busting() {
    let broker = broker();
    let stateful = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));

    stateful.set_state("before").await.expect("set");
    assert_eq!(stateful.get_state().await.expect("get"), "before");

    broker
        .worker_import(module("stateful.rs"), Some("reload-1".to_string()))
        .await
        .expect("import");

    assert_eq!(stateful.get_state().await.expect("get"), "");
    assert_eq!(broker.cache_buster(&module("stateful.rs")).as_deref(), Some("reload-1"));
    assert_eq!(broker.len(), 1);
    broker.terminate();
}

#[tokio::test]
async fn test_cache_buster_reaches_relayed_calls() {
    let broker = broker();
    let stateful = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));
    let reader = broker.worker_fn_proxy(module("reader.rs"), "getState").expect("proxy");

    stateful.set_state("before").await.expect("set");
    assert_eq!(reader.call(Vec::new()).await.expect("relayed"), Value::from("before"));

    broker
        .worker_import(module("stateful.rs"), Some("reload-1".to_string()))
        .await
        .expect("import");

    assert_eq!(stateful.get_state().await.expect("direct"), "");
    assert_eq!(reader.call(Vec::new()).await.expect("relayed"), Value::from(""));

    stateful.set_state("after").await.expect("set");
    assert_eq!(reader.call(Vec::new()).await.expect("relayed"), Value::from("after"));
    broker.terminate();
}

#[tokio::test]
async fn test_thrown_response() {
    let broker = broker();
    let responses = broker.worker_proxy(module("responses.rs")).expect("proxy");

    let err = responses.call("throwForbidden", Vec::new()).await.expect_err("throws");

    assert_eq!(status_of(err.into_remote().expect("remote error")), 403);
    broker.terminate();
}

#[tokio::test]
async fn test_returned_response() {
    let broker = broker();
    let responses = broker.worker_proxy(module("responses.rs")).expect("proxy");

    let response = responses.call("returnForbidden", Vec::new()).await.expect("call");

    assert_eq!(status_of(response), 403);
    broker.terminate();
}

#[tokio::test]
async fn test_proxied_thrown_response() {
    let broker = broker();
    let proxied = broker.worker_proxy(module("proxy_responses.rs")).expect("proxy");

    let err = proxied.call("throwForbidden", Vec::new()).await.expect_err("throws");

    assert_eq!(status_of(err.into_remote().expect("remote error")), 403);
    broker.terminate();
}

#[tokio::test]
async fn test_proxied_returned_response() {
    let broker = broker();
    let proxied = broker.worker_proxy(module("proxy_responses.rs")).expect("proxy");

    let response = proxied.call("returnForbidden", Vec::new()).await.expect("call");

    assert_eq!(status_of(response), 403);
    broker.terminate();
}

#[tokio::test]
async fn test_concurrent_calls() {
    let broker = broker();
    let other = broker.worker_proxy(module("other.rs")).expect("proxy");
    let gubbins = broker.worker_proxy(module("gubbins.rs")).expect("proxy");

    let (a, b, c) = tokio::join!(
        other.call("getWelcome", vec![Value::from("a")]),
        gubbins.call("hello", vec![Value::from("b")]),
        other.call("getWelcome", vec![Value::from("c")]),
    );

    assert_eq!(a.expect("a"), Value::from("Hello a"));
    assert_eq!(b.expect("b"), Value::from("Hello b"));
    assert_eq!(c.expect("c"), Value::from("Hello c"));
    broker.terminate();
}

#[tokio::test]
async fn test_callee_sees_its_source() {
    let broker = broker();
    let storage = broker.worker_proxy(module("storage.rs")).expect("proxy");
    let client = broker.worker_proxy(module("storage_client.rs")).expect("proxy");
    let tenant = broker
        .worker_proxy(WorkerSpecifier::new(module("storage_client.rs")).segregated("tenant"))
        .expect("proxy");

    let saved = client
        .call("save", vec![Value::from("key"), Value::from("client value")])
        .await
        .expect("save");
    assert_eq!(saved, Value::from("client value"));

    let loaded = client.call("load", vec![Value::from("key")]).await.expect("load");
    assert_eq!(loaded, Value::from("client value"));

    let other_source = tenant.call("load", vec![Value::from("key")]).await.expect("load");
    assert!(other_source.is_null());

    let direct = storage.call("get", vec![Value::from("key")]).await.expect("get");
    assert!(direct.is_null());
    broker.terminate();
}

#[tokio::test]
async fn test_calls_after_terminate_start_new_workers() {
    let broker = broker();
    let stateful = Stateful::new(broker.worker_proxy(module("stateful.rs")).expect("proxy"));
    stateful.set_state("old").await.expect("set");

    broker.terminate();
    assert!(broker.is_empty());

    assert_eq!(stateful.get_state().await.expect("get"), "");
    broker.terminate();
}

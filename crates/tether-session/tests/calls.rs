//! Call delivery semantics: timeouts, late callbacks, addressing failures,
//! and the fire-and-forget path.

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};
use tether_core::{Interface, InterfaceRegistry, RpcError, WireError};
use tether_session::{RemoteProxy, SessionConfig};

use common::{connect_pair, pool};

fn short_timeout() -> SessionConfig {
    SessionConfig {
        call_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_call_resolves_handler_value() {
    let registry = InterfaceRegistry::new().register(Interface::new("calc").method(
        "add",
        |args: Vec<Value>| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        },
    ));
    let pool = pool(registry, SessionConfig::default());
    let (client, _server) = connect_pair(&pool, SessionConfig::default()).await;

    let proxy = RemoteProxy::new(client, "calc", ["add"]);
    let result = proxy.call("add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(result, json!(5));
}

#[tokio::test]
async fn test_timeout_fires_once_and_late_callback_is_noop() {
    let registry = InterfaceRegistry::new().register(
        Interface::new("iface")
            .method("slow", |_args: Vec<Value>| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!("too late"))
            })
            .method("fast", |_args: Vec<Value>| async move { Ok(json!("ok")) }),
    );
    let pool = pool(registry, short_timeout());
    let (client, _server) = connect_pair(&pool, short_timeout()).await;

    let err = client.call_method("iface", "slow", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout));

    // Let the late callback arrive; it must be discarded without effect.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let result = client.call_method("iface", "fast", vec![]).await.unwrap();
    assert_eq!(result, json!("ok"));
}

#[tokio::test]
async fn test_buffered_resendable_call_still_times_out() {
    let pool = pool(InterfaceRegistry::new(), short_timeout());
    let (client, _server) = connect_pair(&pool, short_timeout()).await;

    client.disconnect().await;

    // Never reconnected: the timeout is the only bounded-wait mechanism.
    let err = client
        .call_method_with_resend("iface", "method", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout));
}

#[tokio::test]
async fn test_unknown_interface_and_method_from_peer() {
    let registry = InterfaceRegistry::new()
        .register(Interface::new("calc").method("add", |_args: Vec<Value>| async move {
            Ok(json!(0))
        }));
    let pool = pool(registry, SessionConfig::default());
    let (client, _server) = connect_pair(&pool, SessionConfig::default()).await;

    let err = client.call_method("nope", "add", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::UnknownInterface(_)));

    let err = client.call_method("calc", "pow", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::UnknownMethod(_)));
}

#[tokio::test]
async fn test_proxy_rejects_names_outside_dispatch_table() {
    let pool = pool(InterfaceRegistry::new(), SessionConfig::default());
    let (client, _server) = connect_pair(&pool, SessionConfig::default()).await;

    let proxy = RemoteProxy::new(client, "calc", ["add"]);
    let err = proxy.call("pow", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::UnknownMethod(_)));
}

#[tokio::test]
async fn test_handler_error_surfaces_as_remote() {
    let registry = InterfaceRegistry::new().register(Interface::new("iface").method(
        "fail",
        |_args: Vec<Value>| async move { Err::<Value, _>(WireError::remote("no such user")) },
    ));
    let pool = pool(registry, SessionConfig::default());
    let (client, _server) = connect_pair(&pool, SessionConfig::default()).await;

    let err = client.call_method("iface", "fail", vec![]).await.unwrap_err();
    match err {
        RpcError::Remote(message) => assert!(message.contains("no such user")),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_notify_delivers_args_as_data() {
    let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let registry = InterfaceRegistry::new().register(Interface::new("log").method(
        "write",
        move |args: Vec<Value>| {
            let seen = Arc::clone(&recorder);
            async move {
                seen.lock().unwrap().push(args);
                Ok(json!(null))
            }
        },
    ));
    let pool = pool(registry, SessionConfig::default());
    let (client, _server) = connect_pair(&pool, SessionConfig::default()).await;

    let proxy = RemoteProxy::new(client, "log", ["write"]);
    // The trailing argument is data, not a callback.
    proxy
        .notify("write", vec![json!("line"), json!({"level": "info"})])
        .await
        .unwrap();

    for _ in 0..50 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let recorded = seen.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], vec![json!("line"), json!({"level": "info"})]);
}

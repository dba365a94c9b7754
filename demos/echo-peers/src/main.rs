//! Two in-process peers: calls, events, and a resend across a reconnect.
//!
//! Run with: cargo run -p echo-peers-demo

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::{Interface, InterfaceRegistry, JsonSerializer, SharedSerializer, WireError};
use tether_session::{RemoteProxy, SessionConfig, SessionPool, connect};
use tether_transport::pair;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = InterfaceRegistry::new().register(
        Interface::new("echo")
            .method("say", |args: Vec<Value>| async move {
                args.into_iter()
                    .next()
                    .ok_or_else(|| WireError::remote("nothing to say"))
            })
            .method("shout", |args: Vec<Value>| async move {
                let text = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| WireError::remote("expected a string"))?;
                Ok(json!(text.to_uppercase()))
            }),
    );

    let serializer: SharedSerializer = Arc::new(JsonSerializer);
    let pool = Arc::new(SessionPool::new(
        Arc::new(registry),
        SessionConfig::default(),
    ));

    // First connection.
    let (client_end, server_end) = pair();
    let (client, server) = tokio::join!(
        connect(
            Box::new(client_end),
            Arc::clone(&serializer),
            Arc::new(InterfaceRegistry::new()),
            SessionConfig::default(),
        ),
        pool.accept(Box::new(server_end), Arc::clone(&serializer)),
    );
    let (client, server) = (client?, server?);
    tracing::info!(token = %client.token(), "session established");

    let echo = RemoteProxy::new(Arc::clone(&client), "echo", ["say", "shout"]);
    let shouted = echo.call("shout", vec![json!("hello over the wire")]).await?;
    tracing::info!(%shouted, "remote call resolved");

    // Events mirror to the peer's proxy; subscribe there before emitting.
    let mirrored = RemoteProxy::new(server, "echo", Vec::<String>::new());
    let mut events = mirrored.subscribe();
    echo.emit("spoke", json!({"text": "hello over the wire"}));
    let event = events.recv().await?;
    tracing::info!(event = %event.event, args = %event.args, "peer observed event");

    // Drop the link, issue a resendable call, then reconnect under the same
    // token: the call is delivered exactly once after reattach.
    client.disconnect().await;
    tracing::info!("connection closed; issuing a buffered call");

    let caller = Arc::clone(&client);
    let buffered = tokio::spawn(async move {
        caller
            .call_method_with_resend("echo", "say", vec![json!("survived the outage")])
            .await
    });

    let (client_end, server_end) = pair();
    let (reconnected, accepted) = tokio::join!(
        client.reconnect(Box::new(client_end), Arc::clone(&serializer)),
        pool.accept(Box::new(server_end), Arc::clone(&serializer)),
    );
    reconnected?;
    accepted?;
    tracing::info!("reconnected under the same session");

    let value = buffered.await??;
    tracing::info!(%value, "buffered call resolved after reconnect");

    Ok(())
}

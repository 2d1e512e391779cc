//! The same clients and servers over TCP, plus connection-level failures

mod support;

use serde_json::json;
use std::time::Duration;

use jsonrpc2_mq::prelude::*;
use jsonrpc2_mq::TransportError;
use support::{EventCounter, connect_client, init_tracing, inproc_address, start_server, test_handlers};

const TIMEOUT: Duration = Duration::from_secs(5);
const EPHEMERAL: &str = "tcp://127.0.0.1:0";

#[tokio::test]
async fn test_lockstep_over_tcp() {
    init_tracing();
    let server = start_server(
        ServerVariant::MethodsOnly,
        EPHEMERAL,
        test_handlers(EventCounter::default()),
    )
    .await;
    let address = server.endpoint().to_string();
    assert!(address.starts_with("tcp://127.0.0.1:"));
    assert!(!address.ends_with(":0"));

    let mut client = connect_client(ClientVariant::Lockstep, &address, TIMEOUT).await;
    for msg in ["hi", "over the wire"] {
        assert_eq!(client.call("echo", vec![json!(msg)]).await.unwrap(), json!(msg));
    }

    let err = client.call("missing", ()).await.unwrap_err();
    assert_eq!(err.rpc_error().unwrap().kind(), &ErrorKind::MethodNotFound);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_routed_server_over_tcp_with_two_clients() {
    init_tracing();
    let events = EventCounter::default();
    let server = start_server(
        ServerVariant::MethodsAndNotifications,
        EPHEMERAL,
        test_handlers(events.clone()),
    )
    .await;
    let address = server.endpoint().to_string();

    let mut first = connect_client(ClientVariant::Multiplexed, &address, TIMEOUT).await;
    let mut second = connect_client(ClientVariant::Multiplexed, &address, TIMEOUT).await;

    first.notify("event", vec![json!("fell over"), json!("quickly")]).await.unwrap();
    assert_eq!(first.call("echo", vec![json!(1)]).await.unwrap(), json!(1));
    assert_eq!(second.call("echo", vec![json!(2)]).await.unwrap(), json!(2));
    assert_eq!(events.wait_for(1, TIMEOUT).await, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_push_pull_over_tcp() {
    init_tracing();
    let events = EventCounter::default();
    let server = start_server(
        ServerVariant::NotificationsOnly,
        EPHEMERAL,
        test_handlers(events.clone()),
    )
    .await;
    let mut client = connect_client(ClientVariant::PushOnly, server.endpoint(), TIMEOUT).await;

    for i in 0..20 {
        client.notify("event", vec![json!(i), json!("tcp")]).await.unwrap();
    }
    assert_eq!(events.wait_for(20, TIMEOUT).await, 20);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_subscription_over_tcp() {
    init_tracing();
    let mut handlers = test_handlers(EventCounter::default());
    handlers.register_fn("subscribe", |_params, ctx: RequestContext| async move {
        for i in 0..3 {
            ctx.notify("event", Some(RequestParams::positional([json!(i)])))?;
        }
        Ok::<_, anyhow::Error>(json!("subscribed"))
    });
    let server = start_server(ServerVariant::MethodsAndNotifications, EPHEMERAL, handlers).await;

    let received = EventCounter::default();
    let counter = received.clone();
    let notifications = NotificationHandlers::new().on_fn("event", move |_params| {
        let counter = counter.clone();
        async move {
            counter.bump();
            Ok::<_, anyhow::Error>(())
        }
    });
    let config = SubscriptionConfig::new(server.endpoint())
        .with_timeout(TIMEOUT)
        .with_poll_interval(Duration::from_millis(20));
    let mut subscription = SubscriptionClient::connect(config, notifications, None)
        .await
        .unwrap();

    assert_eq!(
        subscription.call("subscribe", ()).await.unwrap(),
        json!("subscribed")
    );
    assert_eq!(received.wait_for(3, TIMEOUT).await, 3);

    subscription.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_nothing_is_refused() {
    init_tracing();
    let config = EndpointConfig::new(inproc_address("nobody-home"));
    let err = RpcClient::connect(ClientVariant::Lockstep, config, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::ConnectionRefused(_))
    ));
}

#[tokio::test]
async fn test_incompatible_patterns_are_refused() {
    init_tracing();
    let server = start_server(
        ServerVariant::NotificationsOnly,
        EPHEMERAL,
        test_handlers(EventCounter::default()),
    )
    .await;

    // a REQ socket cannot talk to a PULL server
    let config = EndpointConfig::new(server.endpoint());
    let err = RpcClient::connect(ClientVariant::Lockstep, config, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::IncompatiblePattern { .. })
    ));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_bind_on_same_address_fails() {
    init_tracing();
    let address = inproc_address("taken");
    let server = start_server(
        ServerVariant::MethodsOnly,
        &address,
        test_handlers(EventCounter::default()),
    )
    .await;

    let config = EndpointConfig::server(&address);
    let err = RpcServer::bind(
        ServerVariant::MethodsOnly,
        config,
        HandlerRegistry::new(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Transport(TransportError::AddressInUse(_))
    ));

    server.stop().await.unwrap();
}

//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use jsonrpc2_mq::prelude::*;
use jsonrpc2_mq::{NotificationPusher, RunningServer};

/// How long `take_a_long_time` sleeps
pub const LONG_TIME: Duration = Duration::from_millis(500);

/// Server poll interval used by every test server
pub const SERVER_POLL: Duration = Duration::from_millis(50);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh in-process address, so tests never share a server
pub fn inproc_address(prefix: &str) -> String {
    format!("inproc://{prefix}-{}", Uuid::new_v4())
}

/// Counts calls to the `event` handler
#[derive(Debug, Clone, Default)]
pub struct EventCounter(Arc<AtomicUsize>);

impl EventCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Poll until the count reaches `expected` or `within` elapses
    pub async fn wait_for(&self, expected: usize, within: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + within;
        while self.get() < expected && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.get()
    }
}

/// echo, dict_args, return_null, take_a_long_time, fail and a counting event
pub fn test_handlers(events: EventCounter) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers
        .register_fn("echo", |params, _ctx| async move {
            let (msg,): (Value,) = RequestParams::parse_optional(params.as_ref())?;
            Ok::<_, anyhow::Error>(msg)
        })
        .register_fn("dict_args", |params, _ctx| async move {
            Ok::<_, anyhow::Error>(params.map(|p| p.to_value()).unwrap_or(Value::Null))
        })
        .register_fn("return_null", |_params, _ctx| async {
            Ok::<_, anyhow::Error>(Value::Null)
        })
        .register_fn("take_a_long_time", |_params, _ctx| async {
            tokio::time::sleep(LONG_TIME).await;
            Ok::<_, anyhow::Error>(Value::Null)
        })
        .register_fn("fail", |_params, _ctx| async {
            Err::<Value, anyhow::Error>(anyhow::anyhow!("the server fell over"))
        })
        .register_fn("event", move |_params, _ctx| {
            let events = events.clone();
            async move {
                events.bump();
                Ok::<_, anyhow::Error>(Value::Null)
            }
        });
    handlers
}

pub async fn start_server(
    variant: ServerVariant,
    address: &str,
    handlers: HandlerRegistry,
) -> RunningServer {
    let config = EndpointConfig::server(address).with_timeout(SERVER_POLL);
    RpcServer::bind(variant, config, handlers, None)
        .await
        .expect("server should bind")
        .spawn()
}

pub async fn connect_client(variant: ClientVariant, address: &str, timeout: Duration) -> RpcClient {
    let config = EndpointConfig::new(address).with_timeout(timeout);
    RpcClient::connect(variant, config, None)
        .await
        .expect("client should connect")
}

/// Push `count` `event` notifications to one client, `interval` apart
pub fn push_events(
    pusher: NotificationPusher,
    client_id: Vec<bytes::Bytes>,
    count: usize,
    interval: Duration,
) {
    tokio::spawn(async move {
        for i in 0..count {
            tokio::time::sleep(interval).await;
            let params = RequestParams::positional([Value::from(i)]);
            if pusher.push(&client_id, "event", Some(params)).is_err() {
                break;
            }
        }
    });
}

//! # jsonrpc2-mq
//!
//! Demo server and one-shot client.
//!
//! ## Usage
//! ```bash
//! # Serve echo, ping, dict_args, return_null and take_a_long_time
//! RUST_LOG=debug cargo run --package jsonrpc2-mq-cli -- serve --address tcp://127.0.0.1:5555
//!
//! # Call a method
//! cargo run --package jsonrpc2-mq-cli -- call --address tcp://127.0.0.1:5555 echo '["hi"]'
//!
//! # Send a notification
//! cargo run --package jsonrpc2-mq-cli -- notify --address tcp://127.0.0.1:5555 event '["fell over", "quickly"]'
//! ```

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use jsonrpc2_mq::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "jsonrpc2-mq")]
#[command(about = "JSON-RPC 2.0 over message-queue sockets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo server until interrupted
    Serve {
        /// Address to bind, e.g. tcp://*:5555 or tcp://127.0.0.1:0
        #[arg(short, long, default_value = "tcp://127.0.0.1:5555")]
        address: String,

        #[arg(long, value_enum, default_value_t = ServerKind::Routed)]
        kind: ServerKind,

        /// How long take_a_long_time sleeps, in milliseconds
        #[arg(long, default_value = "500")]
        long_time_ms: u64,
    },

    /// Call a method and print its result
    Call {
        #[arg(short, long, default_value = "tcp://127.0.0.1:5555")]
        address: String,

        method: String,

        /// Parameters as a JSON array or object
        params: Option<String>,

        #[arg(long, value_enum, default_value_t = ClientKind::Multiplexed)]
        kind: ClientKind,

        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Send a notification
    Notify {
        #[arg(short, long, default_value = "tcp://127.0.0.1:5555")]
        address: String,

        method: String,

        /// Parameters as a JSON array or object
        params: Option<String>,

        #[arg(long, value_enum, default_value_t = ClientKind::Multiplexed)]
        kind: ClientKind,

        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ServerKind {
    /// REP, method calls only
    Lockstep,
    /// ROUTER, method calls and notifications
    Routed,
    /// PULL, notifications only
    Pull,
}

impl From<ServerKind> for ServerVariant {
    fn from(kind: ServerKind) -> Self {
        match kind {
            ServerKind::Lockstep => ServerVariant::MethodsOnly,
            ServerKind::Routed => ServerVariant::MethodsAndNotifications,
            ServerKind::Pull => ServerVariant::NotificationsOnly,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClientKind {
    /// REQ
    Lockstep,
    /// DEALER
    Multiplexed,
    /// PUSH
    Push,
}

impl From<ClientKind> for ClientVariant {
    fn from(kind: ClientKind) -> Self {
        match kind {
            ClientKind::Lockstep => ClientVariant::Lockstep,
            ClientKind::Multiplexed => ClientVariant::Multiplexed,
            ClientKind::Push => ClientVariant::PushOnly,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DictArgs {
    an_int: Option<i64>,
    a_bool: Option<bool>,
    a_float: Option<f64>,
    a_str: Option<String>,
}

fn demo_handlers(long_time: Duration) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers
        .register_fn("echo", |params, _ctx| async move {
            let (msg,): (Value,) = RequestParams::parse_optional(params.as_ref())?;
            Ok::<_, anyhow::Error>(msg)
        })
        .register_fn("ping", |_params, _ctx| async {
            Ok::<_, anyhow::Error>(Value::from("pong"))
        })
        .register_fn("dict_args", |params, _ctx| async move {
            let args = match params {
                Some(params) => params.parse::<DictArgs>()?,
                None => DictArgs::default(),
            };
            Ok::<_, anyhow::Error>(serde_json::to_value(args)?)
        })
        .register_fn("return_null", |_params, _ctx| async {
            Ok::<_, anyhow::Error>(Value::Null)
        })
        .register_fn("take_a_long_time", move |_params, _ctx| async move {
            tokio::time::sleep(long_time).await;
            Ok::<_, anyhow::Error>(Value::Null)
        })
        .register_fn("event", |params, ctx: RequestContext| async move {
            info!(endpoint = %ctx.endpoint, params = ?params, "Event");
            Ok::<_, anyhow::Error>(Value::Null)
        });
    handlers
}

fn parse_params(params: Option<&str>) -> Result<Option<RequestParams>> {
    let Some(raw) = params else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("params must be valid JSON")?;
    match value {
        Value::Null => Ok(None),
        Value::Array(values) => Ok(Some(RequestParams::Array(values))),
        Value::Object(map) => Ok(Some(RequestParams::Object(map))),
        other => bail!("params must be a JSON array or object, got {other}"),
    }
}

async fn serve(address: String, kind: ServerKind, long_time: Duration) -> Result<()> {
    let server = RpcServer::bind(
        kind.into(),
        EndpointConfig::server(address),
        demo_handlers(long_time),
        None,
    )
    .await?
    .spawn();
    info!(endpoint = server.endpoint(), "Serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.stop().await?;
    Ok(())
}

async fn connect(address: String, kind: ClientKind, timeout_ms: u64) -> Result<RpcClient> {
    let config = EndpointConfig::new(address).with_timeout(Duration::from_millis(timeout_ms));
    Ok(RpcClient::connect(kind.into(), config, None).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match args.command {
        Command::Serve {
            address,
            kind,
            long_time_ms,
        } => serve(address, kind, Duration::from_millis(long_time_ms)).await,
        Command::Call {
            address,
            method,
            params,
            kind,
            timeout_ms,
        } => {
            let params = parse_params(params.as_deref())?;
            let mut client = connect(address, kind, timeout_ms).await?;
            let result = client.call(&method, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Notify {
            address,
            method,
            params,
            kind,
            timeout_ms,
        } => {
            let params = parse_params(params.as_deref())?;
            let mut client = connect(address, kind, timeout_ms).await?;
            client.notify(&method, params).await?;
            info!(method = %method, "Notification sent");
            Ok(())
        }
    }
}

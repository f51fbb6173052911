//! squall-bot: run a bot swarm against an RUDP server.
//!
//! With `--local` the binary spins up the in-process broker and sim
//! server first, so a full login/echo scenario runs end-to-end on
//! localhost with no external dependencies.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use squall_graph::{AccessorRegistry, ActionGraph, GraphBuilder, Value};
use squall_harness::{BotSwarm, SimBroker, SimServer, SwarmConfig, session_material};
use squall_proto::{Frame, PacketId};

const LOGIN_REQ: PacketId = PacketId(10);
const LOGIN_RES: PacketId = PacketId(11);
const ECHO_REQ: PacketId = PacketId(20);
const ECHO_RES: PacketId = PacketId(21);

#[derive(Debug, Parser)]
#[command(name = "squall-bot", about = "RUDP bot swarm load tester")]
struct Args {
    /// Session broker address.
    #[arg(long, default_value = "127.0.0.1:10711")]
    broker: String,

    /// Number of bot sessions to run.
    #[arg(long, default_value_t = 1)]
    bots: u16,

    /// Seconds to keep the swarm running.
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Run against a built-in local sim server instead of a real one.
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut local_world = None;
    let broker_addr = if args.local {
        let (key, salt) = session_material(0x5115);
        let server = SimServer::spawn(key.clone(), salt.clone()).await?;
        server.set_auto_reply(LOGIN_REQ, LOGIN_RES);
        server.set_auto_reply(ECHO_REQ, ECHO_RES);
        let broker = SimBroker::spawn(server.addr(), key, salt).await?;
        let addr = broker.addr().to_string();
        info!(server = %server.addr(), broker = %broker.addr(), "local sim world started");
        local_world = Some((server, broker));
        addr
    } else {
        args.broker.clone()
    };

    let swarm = BotSwarm::new(demo_graph(), demo_registry());
    let connected = swarm.start(&SwarmConfig::new(broker_addr, args.bots)).await?;
    info!(connected, bots = args.bots, "swarm running");

    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    swarm.stop().await;

    for stats in swarm.stats().all() {
        info!(
            node = %stats.name,
            executions = stats.execution_count,
            failures = stats.failure_count,
            avg_us = stats.average_duration().as_micros() as u64,
            "node stats"
        );
    }

    if let Some((server, broker)) = local_world {
        broker.stop();
        server.stop();
    }
    Ok(())
}

/// Login, then echo forever on a timer; parse and assert on responses.
fn demo_graph() -> ActionGraph {
    GraphBuilder::new("login and echo")
        .on_connected("session up")
        .then_log("hello", |_, _| "session connected, logging in".to_string())
        .then_send("send login", LOGIN_REQ, |_| {
            let mut frame = Frame::new();
            let _ = frame.write_str("squall-bot");
            frame
        })
        .then_wait_for("await login response", LOGIN_RES, 2_000)
        .on_timeout_do("login timed out", |_, _| {
            Err(squall_graph::NodeError::Handler("login response never arrived".into()))
        })
        .end_wait()
        .then_set("mark logged in", "logged_in", Value::Bool(true))
        .then_send("send echo", ECHO_REQ, |_| {
            let mut frame = Frame::new();
            let _ = frame.write_u64(0xfeed_beef);
            frame
        })
        .on_receive("login response", LOGIN_RES)
        .then_parse("parse login payload", "login_name")
        .then_log("login response", |ctx, _| {
            format!("logged in as {}", ctx.get("login_name").map_or_else(String::new, |v| v.to_string()))
        })
        .on_receive("echo response", ECHO_RES)
        .then_assert(
            "echo payload intact",
            |ctx| {
                ctx.packet().is_some_and(|mut frame| {
                    frame.read_u64().is_ok_and(|value| value == 0xfeed_beef)
                })
            },
            "echo payload mismatch",
            true,
        )
        .then_log("echo ok", |_, _| "echo round-trip verified".to_string())
        .build()
}

/// Accessors available to conditional and packet-parsing nodes.
fn demo_registry() -> AccessorRegistry {
    let mut registry = AccessorRegistry::new();
    registry.register_getter(
        "logged_in",
        "whether the login handshake finished",
        Arc::new(|ctx| ctx.get("logged_in")),
    );
    registry.register_setter(
        "login_name",
        "reads the echoed login name from the payload",
        Arc::new(|ctx, frame| {
            let Some(frame) = frame else {
                return Err(squall_graph::NodeError::Handler("no packet to parse".into()));
            };
            let mut frame = frame.clone();
            let name = frame
                .read_str()
                .map_err(|e| squall_graph::NodeError::Handler(e.to_string()))?;
            ctx.set("login_name", Value::Str(name));
            Ok(())
        }),
    );
    registry.log_summary();
    registry
}

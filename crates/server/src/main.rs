mod engine;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use engine::SampleServerEngine;
use skein::{
    BusConfig, NetworkMediator, RetryingMessageBus, ServerConfig, ServerEvent,
    SocketServerFacade,
};

#[derive(Parser)]
#[command(name = "skein-server")]
#[command(about = "Accepts challenge-verified UDP connections")]
struct Args {
    #[arg(short, long, default_value_t = skein::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = skein::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    #[arg(long, default_value_t = skein::DEFAULT_CHALLENGE_TTL_MS, help = "Challenge lifetime in ms")]
    challenge_ttl: u64,

    #[arg(long, default_value_t = skein::DEFAULT_REPEAT_INTERVAL_MS, help = "Retransmit interval in ms")]
    repeat_interval: u64,

    #[arg(
        long,
        default_value_t = skein::DEFAULT_SESSION_TIMEOUT_SECS,
        help = "Drop sessions silent for this many seconds"
    )]
    session_timeout: u64,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Refuse every new connection attempt")]
    closed: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bus = RetryingMessageBus::spawn(BusConfig {
        repeat_interval: Duration::from_millis(args.repeat_interval),
        ..BusConfig::default()
    })
    .context("failed to start the message bus")?;

    let engine = Arc::new(SampleServerEngine::new());
    engine.set_accepting(!args.closed);

    let mediator = NetworkMediator::new(bus.clone(), engine);
    let server = SocketServerFacade::new();

    let config = ServerConfig {
        port: args.port,
        max_connections: args.max_connections,
        challenge_ttl_ms: args.challenge_ttl,
        session_timeout: Duration::from_secs(args.session_timeout),
        ..ServerConfig::default()
    };
    server.start_server_with(config, mediator)?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    while deadline.is_none_or(|deadline| Instant::now() < deadline) {
        for event in server.drain_events() {
            log_event(&event);
        }
        thread::sleep(Duration::from_millis(50));
    }

    log::info!("Server shutting down");
    server.shut_down();
    for event in server.drain_events() {
        log_event(&event);
    }

    let stats = bus.stats();
    log::info!(
        "Bus: {} transmissions, {} retransmissions, {} resolved, {} expired",
        stats.transmissions,
        stats.retransmissions,
        stats.resolved,
        stats.expired
    );

    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ChallengeIssued { addr } => {
            log::info!("Connection request from {}", addr);
        }
        ServerEvent::ClientConnected { session_id, addr } => {
            log::info!("Client {} connected from {}", session_id, addr);
        }
        ServerEvent::ConnectionDenied { addr } => {
            log::warn!("Connection denied to {}: no session slot left", addr);
        }
        ServerEvent::ChallengeAbandoned { addr } => {
            log::info!("Challenge to {} went unanswered", addr);
        }
        ServerEvent::ClientDisconnected {
            session_id,
            addr,
            reason,
        } => {
            log::info!("Client {} ({}) {}", session_id, addr, reason.as_str());
        }
    }
}

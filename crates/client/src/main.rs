use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;

use skein::{
    BusConfig, ClientConfig, ConnectionState, EngineProxy, NetworkMediator, RetryingMessageBus,
    SocketClientFacade,
};

#[derive(Parser)]
#[command(name = "skein-client")]
#[command(about = "Connects to a skein server and completes the handshake")]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Server host name or address")]
    host: String,

    #[arg(short, long, default_value_t = skein::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 5, help = "Seconds to wait for the handshake")]
    timeout: u64,

    #[arg(long, default_value_t = 0, help = "Seconds to stay connected before leaving")]
    hold: u64,
}

struct ClientEngine;

impl EngineProxy for ClientEngine {
    fn can_connect_to_challenge(&self) -> bool {
        true
    }

    fn networking_established(&self) {
        log::info!("Client networking established");
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bus = RetryingMessageBus::spawn(BusConfig::default())
        .context("failed to start the message bus")?;
    let mediator = NetworkMediator::new(bus, Arc::new(ClientEngine));
    let client = SocketClientFacade::new(ClientConfig::default());

    client.start_client(&args.host, args.port, mediator)?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    while client.state() != ConnectionState::Connected {
        if Instant::now() >= deadline {
            client.shut_down();
            bail!(
                "no answer from {}:{} within {}s",
                args.host,
                args.port,
                args.timeout
            );
        }
        thread::sleep(Duration::from_millis(10));
    }

    if let Some(session_id) = client.session_id() {
        log::info!("Session {} established", session_id);
    }

    thread::sleep(Duration::from_secs(args.hold));

    if let Some(stats) = client.stats() {
        log::info!(
            "Sent {} packets ({} bytes), received {} packets ({} bytes)",
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received
        );
    }
    client.shut_down();

    Ok(())
}

use clap::Parser;
use client::config::ClientConfig;
use client::network::Client;
use client::transport::UdpClientTransport;
use log::{info, warn};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Name stored in this player's own namespace
    #[arg(short, long, default_value = "player")]
    name: String,

    /// Key presented to the server
    #[arg(short = 'k', long, default_value = shared::DEFAULT_PROTOCOL_KEY)]
    protocol_key: String,

    /// Seconds between pings to the server
    #[arg(long, default_value = "5")]
    ping_every: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig::new()
        .with_protocol_key(args.protocol_key)
        .with_player_init_state("name", args.name.into_bytes());
    let client = Client::new(UdpClientTransport::new(), config);

    client.on_connected(|id, others| info!("Joined as {} with {} other players", id, others.len()));
    client.on_player_connected(|id| info!("Player {} joined", id));
    client.on_player_disconnected(|id| info!("Player {} left", id));
    client.on_disconnected(|info| warn!("Disconnected: {}", info.reason));
    client.on_kicked(|reason| warn!("Kicked: {}", reason));
    client.on_banned(|reason| warn!("Banned: {}", reason));
    client.register_rpc("log", |sender, args| {
        info!("{}: {}", sender, String::from_utf8_lossy(args));
    });

    info!("Connecting to {}:{}", args.host, args.port);
    client.connect(&args.host, args.port).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.ping_every.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                if !client.is_connected() {
                    break;
                }
                match client.ping_server(Duration::from_secs(2)).await {
                    Ok(rtt) => info!("Ping: {:.1}ms", rtt.as_secs_f64() * 1000.0),
                    Err(e) => warn!("Ping failed: {}", e),
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

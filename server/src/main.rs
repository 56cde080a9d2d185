use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use server::transport::UdpServerTransport;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "10")]
    max_players: usize,

    /// Make the first player to join an admin
    #[arg(short, long)]
    admin: bool,

    /// IP address to refuse, may be repeated
    #[arg(short, long)]
    banned: Vec<String>,

    /// Global key only the server or an admin may write, may be repeated
    #[arg(short, long)]
    reserved: Vec<String>,

    /// Event loop poll interval in milliseconds
    #[arg(long, default_value = "15")]
    poll_interval_ms: u64,

    /// Key clients must present to connect
    #[arg(short = 'k', long, default_value = shared::DEFAULT_PROTOCOL_KEY)]
    protocol_key: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig::new()
        .with_port(args.port)
        .with_max_players(args.max_players)
        .with_admin_users(args.admin)
        .with_banned_users(args.banned)
        .with_reserved_states(args.reserved)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_protocol_key(args.protocol_key);

    info!("Starting server...");
    info!("Max players: {}", config.max_players);
    if !config.reserved_keys.is_empty() {
        info!("Reserved keys: {:?}", config.reserved_keys);
    }

    let port = config.port;
    let server = Server::new(UdpServerTransport::new(args.host), config);

    server.register_rpc("log", |caller, args| {
        info!("{:?}: {}", caller, String::from_utf8_lossy(args));
    });

    let addr = server.start(port).await?;
    info!("Listening on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop();

    Ok(())
}

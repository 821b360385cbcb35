use clap::Parser;
use log::info;
use server::{GameServer, ServerConfig};

/// Main-method of the reference server.
/// Parses command-line arguments and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "7777")]
        port: u16,
        /// Maximum number of concurrent clients
        #[clap(short, long, default_value = "32")]
        max_clients: usize,
        /// Seconds of silence before a client is dropped
        #[clap(short, long, default_value = "5")]
        timeout: u64,
        /// Player count to report instead of the real one
        #[clap(long)]
        player_count: Option<u32>,
        /// Delay ping responses by this many milliseconds
        #[clap(long, default_value = "0")]
        fake_ping: u64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        max_clients: args.max_clients,
        client_timeout_ms: args.timeout * 1000,
        fixed_player_count: args.player_count,
        fake_ping_ms: args.fake_ping,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = GameServer::bind(&address, config).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

use clap::Parser;
use client::{main_thread_queue, ErrorQueues, NetworkConfig, NetworkManager, ServerRoster};
use log::info;
use shared::ServerAddress;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game server to connect to (host:port)
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Candidate server for the server list, as id=host:port (repeatable)
    #[arg(short = 'r', long = "roster")]
    roster: Vec<String>,

    /// Seconds between probe rounds
    #[arg(short = 'p', long, default_value = "5")]
    probe_interval: u64,

    /// Seconds between keepalives while connected
    #[arg(short = 'k', long, default_value = "2")]
    keepalive_interval: u64,

    /// Worker poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval: u64,

    /// Packet id to print when it arrives from the server
    #[arg(long, default_value = "30000")]
    listen: u16,
}

fn parse_roster_entry(entry: &str) -> Result<(String, ServerAddress), Box<dyn std::error::Error>> {
    let (id, address) = entry
        .split_once('=')
        .ok_or_else(|| format!("roster entry '{}' must look like id=host:port", entry))?;
    Ok((id.to_string(), address.parse()?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = NetworkConfig {
        poll_interval_ms: args.poll_interval,
        ..NetworkConfig::default()
    };

    let roster = Arc::new(ServerRoster::new(config.latency_history_capacity));
    let servers = args
        .roster
        .iter()
        .map(|entry| parse_roster_entry(entry))
        .collect::<Result<Vec<_>, _>>()?;
    roster.load(servers);

    let errors = Arc::new(ErrorQueues::new());
    let (handle, mut main_thread) = main_thread_queue();
    let network = NetworkManager::start(config, Arc::clone(&roster), errors.clone(), handle).await?;

    network.add_listener(args.listen, |packet| {
        println!("Received from server: {:?}", packet);
    });

    if let Some(server) = &args.server {
        let address: ServerAddress = server.parse()?;
        info!("Connecting to: {}", address);
        network.connect(&address.ip, address.port).await?;
    }

    let mut probe_timer = tokio::time::interval(Duration::from_secs(args.probe_interval.max(1)));
    let mut keepalive_timer =
        tokio::time::interval(Duration::from_secs(args.keepalive_interval.max(1)));
    let mut frame = tokio::time::interval(Duration::from_millis(16));

    info!("Press Ctrl+C to quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down..");
                break;
            }

            _ = frame.tick() => {
                main_thread.run_pending();

                for warning in errors.take_warnings() {
                    eprintln!("warning: {}", warning);
                }
                for error in errors.take_errors() {
                    eprintln!("error: {}", error);
                }
            }

            _ = probe_timer.tick() => {
                network.request_probe_all_servers();

                let mut ids: Vec<_> = roster.get_all_addresses().into_keys().collect();
                ids.sort();
                for id in ids {
                    if let (Ok(view), Ok(stats)) = (roster.get_view(&id), roster.get_latency_stats(&id)) {
                        let latency = view
                            .latency
                            .map(|l| format!("{:.1}ms", l.as_secs_f64() * 1000.0))
                            .unwrap_or_else(|| "-".to_string());
                        let quality = stats.quality.map(|q| q.label()).unwrap_or("Unknown");
                        println!("{:<16} {:>10} {:>4} players  {}", id, latency, view.player_count, quality);
                    }
                }
            }

            _ = keepalive_timer.tick(), if network.connected() => {
                if let Err(e) = network.send_keepalive() {
                    eprintln!("error: {}", e);
                }
            }
        }
    }

    network.shutdown().await;
    main_thread.run_pending();

    Ok(())
}

// CLI entry point for the Parlor room relay.
//
// Starts a standalone relay server that board-game clients connect to. The
// relay forwards room-scoped messages between clients — it never runs any
// game logic. See `server.rs` for the networking architecture and
// `rooms.rs` for the membership table.
//
// Usage:
//   relay [OPTIONS]
//     --port <PORT>    Listen port (default: $PORT, else 3000)
//
// The `PORT` environment variable matches the hosting convention the
// original deployment used; `--port` overrides it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use parlor_relay::server::{RelayConfig, start_relay};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = parse_args();

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    info!("relay listening on {addr}");
    info!("press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl+C handler: {e}");
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("shutting down");
    handle.stop();
}

/// Parse command-line arguments into a `RelayConfig`. Uses simple
/// `std::env::args()` matching — no clap dependency. The `PORT` env var is
/// applied first so that an explicit `--port` flag wins.
fn parse_args() -> RelayConfig {
    let mut config = RelayConfig::default();

    if let Ok(port) = std::env::var("PORT") {
        config.port = port.parse().unwrap_or_else(|_| {
            eprintln!("PORT must be a valid port number, got {port:?}");
            std::process::exit(1);
        });
    }

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>    Listen port (default: $PORT, else 3000)");
    println!("  --help, -h       Show this help");
}

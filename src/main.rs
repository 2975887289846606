use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pluto_runtime::config::{DeviceConfig, MemoryConfig, DEFAULT_BAUDRATE, DEFAULT_PORT, READ_TIMEOUT};
use pluto_runtime::device;
use pluto_runtime::runtime::{self, RuntimeOptions};

/// Serial shell bridge for the Pluto vehicle controller
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the controller board
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// JSON file with per-section device settings; built-in defaults otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-command read timeout
    #[arg(long, default_value_t = READ_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Accept motion and relay intents from the start
    #[arg(long)]
    enable_control: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    if args.list_ports {
        match device::list_ports() {
            Ok(ports) if ports.is_empty() => println!("No serial ports found"),
            Ok(ports) => {
                for port in ports {
                    println!("{}\t{}", port.id, port.description);
                }
            }
            Err(e) => {
                eprintln!("Failed to list ports: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let store = match &args.config {
        Some(path) => match MemoryConfig::load(path) {
            Ok(store) => {
                info!("Loaded config from {}", path.display());
                store
            }
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => MemoryConfig::new(),
    };

    let options = RuntimeOptions {
        port: args.port,
        baudrate: args.baud,
        read_timeout: Duration::from_millis(args.timeout_ms),
        config: DeviceConfig::load(&store),
        enable_control: args.enable_control,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

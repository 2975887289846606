// Line-driven teleop: type a command and press enter
//
//   w/s = forward/back, a/d = turn, z/x = rotate, space or "stop" = stop
//   h = engage handbrake, u = release handbrake
//   r<N> = toggle relay N, on/off = remote control, q = quit
//
// Usage: cargo run --example intent_publisher
use pluto_runtime::config::{TOPIC_CMD_INTENT, TOPIC_STATE_VEHICLE};
use pluto_runtime::messages::{Intent, VehicleStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn parse_line(line: &str) -> Option<Intent> {
    let word = line.trim().to_ascii_lowercase();
    let intent = match word.as_str() {
        "w" | "forward" => Intent::Forward,
        "s" | "back" => Intent::Back,
        "a" | "left" => Intent::TurnLeft,
        "d" | "right" => Intent::TurnRight,
        "z" => Intent::RotateLeft,
        "x" => Intent::RotateRight,
        "" | "stop" => Intent::Stop,
        "h" => Intent::SetHandbrake { engaged: true },
        "u" => Intent::SetHandbrake { engaged: false },
        "on" => Intent::SetRemoteControl { enabled: true },
        "off" => Intent::SetRemoteControl { enabled: false },
        relay if relay.starts_with('r') => Intent::ToggleRelay {
            relay: relay[1..].parse().ok()?,
        },
        _ => return None,
    };
    Some(intent)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_INTENT).await?;
    let status = session.declare_subscriber(TOPIC_STATE_VEHICLE).await?;

    info!("Controls: w/s/a/d move, z/x rotate, enter stops, h/u handbrake, rN relay, on/off control, q quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        let Some(intent) = parse_line(&line) else {
            warn!("Unknown command: {:?}", line.trim());
            continue;
        };
        publisher.put(serde_json::to_string(&intent)?).await?;
        info!("Sent {:?}", intent);

        // Show the most recent state the runtime published
        let mut latest = None;
        while let Ok(Some(sample)) = status.try_recv() {
            latest = Some(sample);
        }
        if let Some(sample) = latest {
            match serde_json::from_slice::<VehicleStatus>(&sample.payload().to_bytes()) {
                Ok(state) => info!(
                    "Vehicle: {:?}, handbrake {}, relays {:#010b}, control {}",
                    state.movement,
                    state.handbrake,
                    state.relays.mask(),
                    state.remote_control
                ),
                Err(e) => warn!("Unreadable vehicle state: {}", e),
            }
        }
    }

    Ok(())
}

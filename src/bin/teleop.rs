// Keyboard teleop: W/S drive, A/D turn, space stop, R/F speed, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::json;
use std::time::Duration;
use tracing::info;

use robot_motor_runtime::config::TOPIC_COMMAND;

const SPEEDS: [f64; 3] = [0.25, 0.5, 1.0]; // duty-cycle fraction
const POLL_MS: u64 = 20;

/// Publish motor commands from the keyboard
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Command topic the runtime subscribes to
    #[arg(short, long, default_value = TOPIC_COMMAND)]
    topic: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(args.topic.clone()).await?;

    info!("Publishing to {}", args.topic);
    info!("Controls: W/S=drive, A/D=turn, SPACE=stop, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    // Leave the robot stopped whatever happened
    publisher.put(json!({ "command": "stop" }).to_string()).await?;
    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    loop {
        if !event::poll(Duration::from_millis(POLL_MS))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        // Commands are latched by the runtime, so key repeats are not re-sent
        if kind != KeyEventKind::Press {
            continue;
        }

        let speed = SPEEDS[speed_idx];
        let cmd = match code {
            KeyCode::Char('w') => json!({ "command": "drive", "direction": "forward", "speed": speed }),
            KeyCode::Char('s') => json!({ "command": "drive", "direction": "backward", "speed": speed }),
            KeyCode::Char('a') => json!({ "command": "turn", "direction": "left", "speed": speed }),
            KeyCode::Char('d') => json!({ "command": "turn", "direction": "right", "speed": speed }),
            KeyCode::Char(' ') => json!({ "command": "stop" }),

            // Speed control
            KeyCode::Char('r') => {
                speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                print_speed(speed_idx);
                continue;
            }
            KeyCode::Char('f') => {
                speed_idx = speed_idx.saturating_sub(1);
                print_speed(speed_idx);
                continue;
            }

            // Quit
            KeyCode::Char('q') | KeyCode::Esc => break,

            _ => continue,
        };

        publisher.put(cmd.to_string()).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({}%)", label, SPEEDS[idx] * 100.0);
}

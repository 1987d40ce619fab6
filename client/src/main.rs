use clap::Parser;
use client::{connect, ClientConfig};
use log::info;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Headless client that walks its player back and forth
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Connect with wss://
    #[arg(long)]
    tls: bool,

    /// Host frames per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Frames between direction changes
    #[arg(long, default_value = "60")]
    swap_every: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    let config = ClientConfig::new(args.server).with_tls(args.tls);
    let mut runtime = connect(&config).await?;

    let mut frame = interval(Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let swap_every = args.swap_every.max(1);
    let mut frames: u64 = 0;
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = frame.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }

        let moving_left = (frames / swap_every) % 2 == 1;
        runtime.set_input(moving_left, !moving_left);
        runtime.tick(Instant::now());
        runtime.advance();
        frames += 1;

        if runtime.is_connected() {
            was_connected = true;
        } else if was_connected {
            info!("Connection lost, exiting");
            break;
        }

        if frames % swap_every == 0 {
            for (slot, player) in runtime.players() {
                info!("{:?} at ({:.1}, {:.1})", slot, player.x, player.y);
            }
        }
    }

    Ok(())
}

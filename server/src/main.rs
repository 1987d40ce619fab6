use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, TlsConfig};
use shared::{DEFAULT_PORT, MAX_CLIENTS};
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host frames per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,

    /// PEM certificate chain; serves wss:// together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ServerConfig::new(format!("{}:{}", args.host, args.port))
        .with_max_clients(args.max_clients);
    if let (Some(cert_path), Some(key_path)) = (args.tls_cert, args.tls_key) {
        config = config.with_tls(TlsConfig { cert_path, key_path });
    }

    info!("Starting server...");
    info!("Tick rate: {} Hz", args.tick_rate);
    info!("Max clients: {}", config.max_clients);

    let (listener, mut runtime) = server::bind(config).await?;

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener failed: {}", e);
        }
    });

    let mut frame = interval(Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let host_loop = async {
        loop {
            frame.tick().await;
            runtime.tick(Instant::now());
            runtime.advance();
        }
    };

    tokio::select! {
        _ = host_loop => {}
        result = listener_handle => {
            if let Err(e) = result {
                error!("Listener task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

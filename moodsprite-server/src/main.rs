use clap::Parser;
use moodsprite_core::SpriteConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use moodsprite_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "moodsprite.toml")]
    config: String,

    /// Check the session store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match SpriteConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        let store = match server::connect_store(&config).await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Session store unavailable: {}", e);
                std::process::exit(1);
            }
        };
        match store.health().await {
            Ok(v) => println!("✅ Session store connected: {}", v),
            Err(e) => {
                println!("❌ Session store health check failed: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    server::run(config, tx.subscribe()).await?;

    Ok(())
}

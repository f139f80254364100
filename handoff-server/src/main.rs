use std::sync::Arc;

use clap::Parser;
use handoff_core::{Clock, HandoffConfig, SystemClock};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use handoff_server::subsystems::lifecycle::SessionManager;
use handoff_server::subsystems::push::{BroadcastHub, PushChannel};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "handoff.toml")]
    config: String,

    /// Check store connectivity and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present; production sets real env vars
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match HandoffConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG still wins for anything it names
    let directive: tracing_subscriber::filter::Directive = config
        .service
        .log_level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    // Connect to store
    let store = match handoff_core::store::connect(&config.database).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to chat store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.ping().await {
            Ok(v) => println!("✅ Chat store connected: {}", v),
            Err(e) => {
                println!("❌ Chat store check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Handoff health check passed");
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let push: Arc<dyn PushChannel> = Arc::new(BroadcastHub::new(config.push.topic_capacity));
    let manager = Arc::new(SessionManager::new(
        store,
        push,
        clock.clone(),
        config.sync.clone(),
    ));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    // Expire abandoned waiting sessions
    let maintenance = tokio::spawn(handoff_server::subsystems::maintenance::run_maintenance_loop(
        manager.clone(),
        clock,
        config.maintenance.clone(),
        tx.subscribe(),
    ));

    if config.http.enabled {
        handoff_server::http::start_http_server(manager, config, tx.subscribe()).await?;
    } else {
        tracing::warn!("HTTP API disabled; only the maintenance loop is running");
    }

    let _ = maintenance.await;
    Ok(())
}

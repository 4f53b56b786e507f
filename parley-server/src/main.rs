use clap::Parser;
use parley_core::ParleyConfig;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use parley_server::sessions::SessionRegistry;
use parley_server::{http, server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "parley.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match ParleyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Build engines and the session registry
    let registry = Arc::new(SessionRegistry::from_config(&config));

    if args.health {
        let providers = registry.provider_names();
        if providers.is_empty() {
            println!("❌ No usable providers (check API keys)");
            std::process::exit(1);
        }
        for name in &providers {
            println!("✅ Provider ready: {}", name);
        }

        if providers.iter().any(|p| p.as_str() == registry.default_provider()) {
            println!("✅ Default provider: {}", registry.default_provider());
        } else {
            println!("❌ Default provider '{}' is not configured", registry.default_provider());
            std::process::exit(1);
        }

        if registry.sink_configured() {
            println!("✅ Trace sink configured");
        } else {
            println!("⚠️  Trace sink not configured — traces stay local");
        }

        println!("✅ Parley health check passed");
        return Ok(());
    }

    // Shutdown broadcast
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn HTTP REST API server if enabled
    if config.http.enabled {
        let http_registry = registry.clone();
        let http_config = config.http.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(http_registry, http_config, http_shutdown).await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, registry, tx.subscribe()).await?;

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mieled::Config;
use mieled::Engine;
use mieled::EntityRegistry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about = "Miele appliance bridge")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "mieled.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    tracing::info!("mieled starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let registry = match &config.registry.path {
        Some(path) => EntityRegistry::load(path)
            .with_context(|| format!("Failed to load entity registry {}", path.display()))?,
        None => {
            tracing::info!("No registry path configured, entity registry is in memory only");
            EntityRegistry::in_memory()
        }
    };

    let mut engine = Engine::new(Arc::new(registry));
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api = config.api.as_ref().map(|api| {
        let listen = api.listen.clone();
        let port = api.port;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = mieled::api::serve(listen, port, engine, api_shutdown_rx).await {
                tracing::error!("HTTP API failed: {:#}", e);
            }
        })
    });

    tracing::info!("Press Ctrl+C to exit");
    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                tracing::error!("Engine stopped with error: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    if let Some(api) = api {
        let _ = api_shutdown_tx.send(());
        if let Err(e) = api.await {
            tracing::warn!("HTTP API task ended abnormally: {}", e);
        }
    }

    tracing::info!("mieled shutdown complete");
    Ok(())
}

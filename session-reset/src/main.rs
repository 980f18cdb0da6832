use anyhow::{Context, Result};
use clap::Parser;
use session_reset::file_store::JsonFileStore;
use session_reset::logging::init_tracing;
use session_reset::{
    HttpTeardownBackend, InvalidationBus, InvalidationEvent, ResetConfig, ResetCoordinator,
    ResetOutcome, SessionIdentity,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "session-reset")]
#[command(about = "Clear all app data for the signed-in field worker", version)]
struct Cli {
    /// Path to configuration file (extension optional)
    #[arg(short, long, default_value = "config/default")]
    config: String,

    /// Print whether a session is stored and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let (mut config, load_error) = match ResetConfig::from_file(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (ResetConfig::default(), Some(e)),
    };

    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting session-reset v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!(path = %args.config, "Configuration loaded"),
        Some(e) => warn!(error = %e, "Failed to load config file, using defaults"),
    }

    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;

    let secure = Arc::new(JsonFileStore::new(&config.storage.secure_store_path));
    let cache = Arc::new(JsonFileStore::new(&config.storage.cache_path));

    if args.status {
        match SessionIdentity::load(secure.as_ref()).await? {
            Some(identity) => println!(
                "Signed in as {}",
                identity.display_name.as_deref().unwrap_or("(unnamed worker)")
            ),
            None => println!("No active session"),
        }
        return Ok(());
    }

    let bus = InvalidationBus::new();
    let _history = bus.subscribe(InvalidationEvent::RecentActivityCleared, |_| {
        info!("Recent activity history discarded");
    });
    let _realtime = bus.subscribe(InvalidationEvent::AppDataCleared, |_| {
        info!("Session state reinitialized, real-time connections closed");
    });

    let coordinator = ResetCoordinator::from_config(
        &config,
        secure,
        cache,
        Arc::new(
            HttpTeardownBackend::new(&config.backend)
                .context("Failed to create teardown backend")?,
        ),
        bus,
    );

    println!("Press Enter to clear all app data (Ctrl-D to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while lines
        .next_line()
        .await
        .context("Failed to read from stdin")?
        .is_some()
    {
        let outcome = coordinator.request_reset().await;
        println!("{}", outcome.user_message());
        if let ResetOutcome::Completed(report) = outcome {
            info!(
                remote_ok = report.remote.fully_succeeded(),
                purge_ok = report.purge_warning.is_none(),
                completed_at = %report.completed_at,
                "Reset finished"
            );
            break;
        }
    }

    Ok(())
}

//! dcmvault application binary - composition root.
//!
//! 1. Resolve configuration (CLI > env > TOML file > defaults)
//! 2. Initialize tracing
//! 3. Open the catalog database and storage directories
//! 4. Sweep stale staging files and uncataloged slots
//! 5. Start the axum REST API server

mod cli;

use clap::Parser;

use dcmvault_api::routes;
use dcmvault_api::AppState;
use dcmvault_core::VaultConfig;
use dcmvault_storage::CatalogStore;

use crate::cli::CliArgs;

/// Remove leftovers from a previous run that stopped mid-ingest.
///
/// Both passes log their own results; only failures are reported here.
fn sweep(state: &AppState) {
    if let Err(e) = state.pipeline.stager().purge_stale() {
        tracing::warn!(error = %e, "Staging purge failed");
    }
    if let Err(e) = state.pipeline.store().sweep_orphans(&state.catalog) {
        tracing::warn!(error = %e, "Orphan sweep failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    // Config is resolved before tracing so the file can set the log level.
    let config_file = cli.resolve_config_path();
    let file_found = config_file.exists();
    let mut config = if file_found {
        VaultConfig::load(&config_file)?
    } else {
        VaultConfig::default()
    };
    cli.apply(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting dcmvault v{}", env!("CARGO_PKG_VERSION"));
    if file_found {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }
    config.validate()?;

    // Storage.
    let state = AppState::open(config.clone())?;
    tracing::info!(
        database = %config.storage.database_path.display(),
        content = %config.storage.content_dir.display(),
        staging = %config.storage.staging_dir.display(),
        artifacts = state.catalog.count()?,
        "Storage opened"
    );

    if config.storage.sweep_orphans_on_start {
        sweep(&state);
    }

    // === API server ===

    if let Err(e) = routes::start_server(&config, state).await {
        tracing::error!(error = %e, "Server stopped");
        return Err(e.into());
    }

    Ok(())
}

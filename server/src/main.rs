use clap::{Parser, Subcommand};
use connector_service::api::{AppState, api_router};
use connector_service::config::{AppConfig, redact_db_url};
use connector_service::connector::registry::builtin_registry;
use connector_service::crypto::EncryptionService;
use connector_service::dispatch::Dispatcher;
use connector_service::repository::ConnectionRepository;
use migration::{Migrator, MigratorTrait};
use rand_core::RngCore;
use sea_orm::Database;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "connector-service", about = "Connection registry and capability dispatch service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service (default)
    Serve,
    /// Print a fresh random API key for CONN_API_KEY
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init structured logging (respects RUST_LOG; defaults to info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::GenerateKey) => {
            println!("{}", random_hex_key());
            return Ok(());
        }
        None | Some(Commands::Serve) => {}
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    serve(config).await
}

fn random_hex_key() -> String {
    let mut bytes = [0u8; 32];
    rand_core::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(database = %redact_db_url(&config.database_url), "connecting to database");

    let db = Database::connect(&config.database_url).await?;
    Migrator::up(&db, None).await?;

    tracing::info!("database initialized");

    let crypto = if config.encrypt_params {
        Arc::new(EncryptionService::new(&config.secret_key))
    } else {
        tracing::warn!(
            "CONN_ENCRYPT_PARAMS is off — connection params will be stored as \
             plaintext JSON. Rows written in this mode are not re-encrypted \
             when the toggle is turned back on."
        );
        Arc::new(EncryptionService::disabled())
    };

    let registry = Arc::new(builtin_registry());
    for info in registry.list() {
        tracing::debug!(connector_type = info.connector_type, "connector registered");
    }

    let repo = Arc::new(ConnectionRepository::new(
        db,
        crypto,
        registry.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        repo.clone(),
        config.capability_timeout,
    ));

    let state = AppState {
        registry,
        repo,
        dispatcher,
        api_key: config.api_key.clone(),
    };

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Connector service online");

    axum::serve(listener, api_router(state, &config.cors_allowed_origins)).await?;

    Ok(())
}

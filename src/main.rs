use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use terrareg::config::ServerConfig;
use terrareg::server::{AppState, create_router};
use terrareg::storage;
use terrareg::store::{SqliteStore, Store};

const EXIT_CONFIG: u8 = 1;
const EXIT_DATABASE: u8 = 2;
const EXIT_STORAGE: u8 = 3;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Parser)]
#[command(name = "terrareg")]
#[command(about = "A private Terraform module and provider registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// TOML configuration file
        #[arg(long, env = "TERRAREG_CONFIG")]
        config: Option<PathBuf>,

        /// Port to bind to, overriding listen_port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate the configuration and exit
    CheckConfig {
        /// TOML configuration file
        #[arg(long, env = "TERRAREG_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// A startup failure and the exit code it maps to.
struct Fatal {
    code: u8,
    error: anyhow::Error,
}

impl Fatal {
    fn new(code: u8, error: impl Into<anyhow::Error>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }
}

fn load_config(path: Option<&std::path::Path>, port: Option<u16>) -> Result<ServerConfig, Fatal> {
    let mut config = ServerConfig::load(path).map_err(|e| Fatal::new(EXIT_CONFIG, e))?;
    if let Some(port) = port {
        config.listen_port = port;
    }
    Ok(config)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down");
    shutdown.cancel();
}

fn spawn_session_purge(store: Arc<dyn Store>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match store.purge_expired_sessions(Utc::now()) {
                        Ok(0) => {}
                        Ok(n) => info!("Purged {n} expired sessions"),
                        Err(e) => warn!("Failed to purge expired sessions: {e}"),
                    }
                }
            }
        }
    });
}

async fn serve(config: ServerConfig) -> Result<(), Fatal> {
    let location = config
        .database_location()
        .map_err(|e| Fatal::new(EXIT_CONFIG, e))?;
    let addr = config
        .socket_addr()
        .map_err(|e| Fatal::new(EXIT_CONFIG, e))?;

    let store = SqliteStore::open(&location).map_err(|e| Fatal::new(EXIT_DATABASE, e))?;
    store
        .initialize()
        .map_err(|e| Fatal::new(EXIT_DATABASE, e))?;
    let store: Arc<dyn Store> = Arc::new(store);

    let blobs = storage::connect(&config)
        .await
        .map_err(|e| Fatal::new(EXIT_STORAGE, e))?;
    blobs
        .health_check()
        .await
        .map_err(|e| Fatal::new(EXIT_STORAGE, e))?;
    info!("Using {} blob storage", blobs.backend_name());

    let shutdown = CancellationToken::new();
    spawn_session_purge(store.clone(), shutdown.clone());

    let state = Arc::new(AppState::new(store, blobs, config));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Fatal::new(EXIT_CONFIG, e))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| Fatal::new(EXIT_CONFIG, e))?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = match "terrareg=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, port } => match load_config(config.as_deref(), port) {
            Ok(config) => serve(config).await,
            Err(fatal) => Err(fatal),
        },
        Commands::CheckConfig { config } => load_config(config.as_deref(), None).map(|config| {
            println!(
                "Configuration OK (listening on {}:{})",
                config.listen_host, config.listen_port
            );
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(fatal) => {
            error!("{:#}", fatal.error);
            eprintln!("error: {:#}", fatal.error);
            ExitCode::from(fatal.code)
        }
    }
}

//! ROADY CLI - Run the construction management API server.

use clap::{Parser, Subcommand};
use roady::api::{create_router, AppState};
use roady::cache::{MemoryStore, RedisStore, RemoteStore};
use roady::config::{Config, LogFormat};
use roady::error::expose_internal_errors;
use roady::store::Store;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "roady")]
#[command(about = "Construction management API: projects, billing, notifications and AI agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Log output format
        #[arg(long, value_enum)]
        log_format: Option<Format>,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Format {
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, log_format, config }) => {
            run_server(port, log_format, config).await?;
        }
        Some(Commands::Config { path }) => {
            show_config(path)?;
        }
        None => {
            run_server(None, None, None).await?;
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(false)).init(),
    }
}

async fn remote_cache(config: &Config) -> Arc<dyn RemoteStore> {
    match config.cache.redis_url.as_deref() {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, using in-process cache tier");
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}

async fn run_server(
    port_override: Option<u16>,
    format_override: Option<Format>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config = config.with_env_overrides();
    init_tracing(&config, format_override.map(Into::into).unwrap_or(config.logging.format));
    expose_internal_errors(!config.is_production());

    let port = port_override.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port).parse()?;

    let store = Store::open(&config.database.path)?;
    let remote = remote_cache(&config).await;
    let state = Arc::new(AppState::new(config, store, remote)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "ROADY listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn show_config(show_path: bool) -> anyhow::Result<()> {
    if show_path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }

    let config = Config::load()?.with_env_overrides();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

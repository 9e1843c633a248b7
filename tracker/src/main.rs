use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracker::auth::CredentialService;
use tracker::config::AppConfig;
use tracker::db::{CreateUser, Store};
use tracker::live::Reconciler;
use tracker::model::Role;
use tracker::packet_log::{PacketLogger, DEFAULT_LOG_FILE};
use tracker::rest::{self, AppState};
use tracker::session::SessionStore;
use tracker::{metrics, simulator};

#[derive(Debug, Parser)]
#[command(name = "tracker", version, about = "Tracker telemetry backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the simulator (default).
    Serve,
    /// Create the admin user, or reset its password if it already exists.
    CreateAdmin {
        #[arg(long, env = "TRACKER_ADMIN_USERNAME", default_value = "admin")]
        username: String,
        #[arg(long, env = "TRACKER_ADMIN_PASSWORD")]
        password: String,
    },
    /// Write stored packets to a text log, optionally following new ones.
    LogPackets {
        #[arg(long, default_value = DEFAULT_LOG_FILE)]
        file: PathBuf,
        /// Number of recent packets written at start.
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Keep running and append packets as they are stored.
        #[arg(long)]
        follow: bool,
        /// Poll interval in milliseconds while following.
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CreateAdmin { username, password } => {
            create_admin(config, &username, &password).await
        }
        Command::LogPackets {
            file,
            limit,
            follow,
            interval_ms,
        } => log_packets(config, file, limit, follow, interval_ms).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting tracker backend");
    info!("HTTP server: {}", config.server.http_addr);
    info!("Database: {}", config.database.url);

    metrics::init_metrics().context("failed to register metrics")?;

    let store = Store::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open database")?;
    let credentials = CredentialService::new(store.clone()).await?;
    let reconciler = Arc::new(Reconciler::new(store, config.hardware.timeout));

    let simulator = if config.simulator.enabled {
        Some(simulator::spawn_simulator(
            reconciler.clone(),
            config.simulator.interval,
        ))
    } else {
        info!("Simulator disabled");
        None
    };

    let state = AppState {
        reconciler,
        credentials: Arc::new(credentials),
        sessions: Arc::new(SessionStore::new(
            config.server.session_ttl,
            config.server.cookie_secure,
        )),
        history_max: config.server.history_max,
    };

    let app = rest::create_router(state, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.server.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.http_addr))?;

    info!("HTTP server listening on {}", config.server.http_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {}", e);
    }

    if let Some(simulator) = simulator {
        simulator.stop().await;
    }

    info!("Shutting down");
    Ok(())
}

async fn create_admin(config: AppConfig, username: &str, password: &str) -> anyhow::Result<()> {
    let store = Store::connect(&config.database.url, config.database.max_connections).await?;
    let credentials = CredentialService::new(store).await?;

    match credentials.create_user(username, password, Role::Admin).await? {
        CreateUser::Created(id) => info!(id, username, "Admin created"),
        CreateUser::Conflict => {
            credentials.reset_password(username, password).await?;
            info!(username, "Admin already existed, password reset");
        }
    }
    Ok(())
}

async fn log_packets(
    config: AppConfig,
    file: PathBuf,
    limit: usize,
    follow: bool,
    interval_ms: u64,
) -> anyhow::Result<()> {
    if interval_ms == 0 {
        anyhow::bail!("--interval-ms must be greater than zero");
    }

    let store = Store::connect(&config.database.url, config.database.max_connections).await?;
    let logger = PacketLogger::new(store, file);
    let last_id = logger
        .export_recent(limit)
        .await
        .with_context(|| format!("failed to write {}", logger.path().display()))?;

    if !follow {
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });
    logger
        .follow(last_id, Duration::from_millis(interval_ms), stop_rx)
        .await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

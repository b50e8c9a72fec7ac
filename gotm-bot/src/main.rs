//! gotm-bot - Gumby of the Month election bot
//!
//! Startup sequence: load configuration, open the store, connect to the chat
//! server, reconcile every known guild, start the election scheduler, then
//! serve the vote API until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gotm_bot::chat::{ChatServer, DiscordClient};
use gotm_bot::election::{ElectionEngine, ElectionPolicy};
use gotm_bot::reconciler::GuildReconciler;
use gotm_bot::scheduler::{ElectionScheduler, SchedulerConfig, SchedulerExit};
use gotm_bot::vote::VoteService;
use gotm_bot::{build_router, AppState};
use gotm_common::config::{load_config, resolve_config_path, resolve_discord_token};
use gotm_common::store::open_store;

#[derive(Parser, Debug)]
#[command(name = "gotm-bot")]
#[command(about = "Gumby of the Month guild election bot")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the vote API (overrides the config file)
    #[arg(short, long, env = "GOTM_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gotm_bot={0},gotm_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting gotm-bot v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    let token = resolve_discord_token(&config).context("Chat-server token is required")?;

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let store = open_store(Some(&db_path), &config.table_name)
        .await
        .context("Failed to open resource store")?;

    let client = DiscordClient::new(
        &config.discord.api_base,
        &token,
        Duration::from_millis(config.discord.min_request_interval_ms),
    )
    .context("Failed to build chat client")?;
    let chat: Arc<dyn ChatServer> = Arc::new(client);

    let self_id = chat
        .current_user()
        .await
        .context("Failed to identify bot account")?;
    info!(user_id = %self_id, "Connected to chat server");

    let reconciler = Arc::new(GuildReconciler::new(chat.clone(), store.clone()));
    reconcile_known_guilds(chat.as_ref(), &reconciler).await;

    let engine = Arc::new(ElectionEngine::new(
        store.clone(),
        chat.clone(),
        reconciler,
        self_id,
        ElectionPolicy {
            remove_foreign_bots: config.election.remove_foreign_bots,
        },
    ));

    let cancel = CancellationToken::new();
    let scheduler = ElectionScheduler::new(
        engine,
        chat,
        SchedulerConfig::from(&config.election),
        cancel.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    if config.api.shared_secret == 0 {
        warn!("API authentication disabled (shared_secret = 0)");
    }
    let state = AppState::new(VoteService::new(store), config.api.shared_secret);
    let app = build_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.api.bind_address, port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Vote API listening on http://{}", addr);

    let server_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                // A scheduler fault also brings the API down
                _ = server_cancel.cancelled() => {}
            }
        })
        .await;

    cancel.cancel();
    match scheduler_task.await {
        Ok(SchedulerExit::Cancelled) => info!("Scheduler stopped"),
        Ok(SchedulerExit::Fault(reason)) => error!("Scheduler had faulted: {}", reason),
        Err(e) => error!("Scheduler task panicked: {}", e),
    }

    served.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}

/// Bring every guild up to the standard layout before the first election
async fn reconcile_known_guilds(chat: &dyn ChatServer, reconciler: &GuildReconciler) {
    let guilds = match chat.guilds().await {
        Ok(guilds) => guilds,
        Err(e) => {
            warn!("Could not enumerate guilds for startup reconciliation: {}", e);
            return;
        }
    };

    for guild in guilds {
        match reconciler.reconcile(guild).await {
            Ok(report) if report.is_complete() => info!(guild_id = %guild, "Guild reconciled"),
            Ok(report) => warn!(
                guild_id = %guild,
                failures = report.failures.len(),
                "Guild partially reconciled"
            ),
            Err(e) => warn!(guild_id = %guild, "Guild reconciliation failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

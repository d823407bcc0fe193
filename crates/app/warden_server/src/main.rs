//! Warden server binary.
//!
//! Serves the registration, approval and administrative routes, gates the
//! authorize endpoint, and runs the DCR cleanup sweep in the background.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_api::config::{ApiConfig, DEFAULT_APPROVAL_PATH, DEFAULT_AUTHORIZE_PATH};
use warden_core::cleanup::CleanupService;
use warden_core::policy::{
    DEFAULT_REFRESH_TOKEN_LIFETIME_SECS, DEFAULT_STATUS_EXPIRY_AGE_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_UNAPPROVED_MAX_AGE_SECS, LifecyclePolicy, MAX_POLICY_SECS,
};
use warden_core::seed::{SeedData, ensure_seed_data};
use warden_core::store::PgStore;

/// Policy knobs are whole seconds, at least one and at most ten years.
fn policy_secs() -> clap::builder::RangedI64ValueParser<i64> {
    clap::value_parser!(i64).range(1..=MAX_POLICY_SECS)
}

/// CLI arguments for the warden server.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "DCR client lifecycle server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3200")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Bearer token for the administrative routes.
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Externally visible base URL (e.g. https://login.example).
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,

    /// Protocol engine that receives every request warden does not handle.
    #[arg(long, env = "ENGINE_URL")]
    engine_url: Option<String>,

    /// Authorize endpoint guarded by the approval gate.
    #[arg(long, env = "AUTHORIZE_PATH", default_value = DEFAULT_AUTHORIZE_PATH)]
    authorize_path: String,

    /// Path of the approval surface.
    #[arg(long, env = "APPROVAL_PATH", default_value = DEFAULT_APPROVAL_PATH)]
    approval_path: String,

    /// YAML file with static clients and API resources.
    #[arg(long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Seconds between cleanup sweeps.
    #[arg(
        long,
        env = "SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        value_parser = policy_secs()
    )]
    sweep_interval_secs: i64,

    /// Age in seconds after which an unapproved DCR client is deleted.
    #[arg(
        long,
        env = "UNAPPROVED_MAX_AGE_SECS",
        default_value_t = DEFAULT_UNAPPROVED_MAX_AGE_SECS,
        value_parser = policy_secs()
    )]
    unapproved_max_age_secs: i64,

    /// Age in seconds after which an enabled client is listed as expired.
    #[arg(
        long,
        env = "STATUS_EXPIRY_AGE_SECS",
        default_value_t = DEFAULT_STATUS_EXPIRY_AGE_SECS,
        value_parser = policy_secs()
    )]
    status_expiry_age_secs: i64,

    /// Refresh-token lifetime in seconds for clients that carry none.
    #[arg(
        long,
        env = "REFRESH_TOKEN_LIFETIME_SECS",
        default_value_t = DEFAULT_REFRESH_TOKEN_LIFETIME_SECS,
        value_parser = policy_secs()
    )]
    refresh_token_lifetime_secs: i64,
}

impl Args {
    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            sweep_interval: Duration::seconds(self.sweep_interval_secs),
            unapproved_max_age: Duration::seconds(self.unapproved_max_age_secs),
            status_expiry_age: Duration::seconds(self.status_expiry_age_secs),
            default_refresh_token_lifetime: Duration::seconds(self.refresh_token_lifetime_secs),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,warden_api=debug,warden_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let policy = args.policy();

    info!(
        version = warden_core::version(),
        bind_addr = %args.bind_addr,
        "starting warden_server"
    );
    info!(
        max_connections = args.max_connections,
        "configuring connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    warden_core::migrate::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    if let Some(path) = &args.seed_file {
        info!(path = %path.display(), "applying seed data");
        let seed = SeedData::from_file(path)?;
        ensure_seed_data(store.as_ref(), seed).await?;
    }

    if args.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set; administrative routes will refuse every request");
    }

    let config = ApiConfig {
        bind_addr: args.bind_addr,
        database_url: args.database_url,
        admin_token: args.admin_token,
        public_url: args.public_url,
        engine_url: args.engine_url,
        authorize_path: args.authorize_path,
        approval_path: args.approval_path,
        policy,
    };

    let ct = CancellationToken::new();
    let sweep = CleanupService::new(store.clone(), store.clone(), policy).spawn(ct.clone());

    let state = warden_api::AppState::new(store, config.clone())?;
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "warden listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop the sweep once the listener is done.
    ct.cancel();
    if let Err(e) = sweep.await {
        warn!(error = %e, "cleanup task ended abnormally");
    }

    serve_result?;

    Ok(())
}

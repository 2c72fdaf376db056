mod api;
mod middleware;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use xharvest_db::PgJobStore;
use xharvest_harvester::{ChromiumLauncher, ChromiumSettings, JobRunner};

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = xharvest_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool = xharvest_db::connect_pool_from_config(&config).await?;
    let applied = xharvest_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    // Running jobs from a previous server process are abandoned. A CLI worker
    // still harvesting one stops at its next window once it is failed here.
    let orphaned = xharvest_db::fail_orphaned_jobs(&pool).await?;
    if orphaned > 0 {
        tracing::warn!(orphaned, "marked interrupted jobs as failed");
    }

    let launcher = Arc::new(ChromiumLauncher::new(ChromiumSettings::from_app_config(
        &config,
    )));
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let runner = Arc::new(JobRunner::from_app_config(store, launcher, &config));

    let auth = AuthState::from_config(&config)?;
    let app = build_app(
        AppState {
            pool,
            runner,
            export_dir: Arc::new(config.export_dir.clone()),
        },
        auth,
    );

    tracing::info!(bind_addr = %config.bind_addr, env = %config.env, "starting server");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

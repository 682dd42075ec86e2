use chrono::Utc;
use des_dashboard::{
    AppState, Config, router,
    source::{PgSource, Sources},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env()?;
    let deployment = config.deployment.deployment();
    info!(
        deployment = deployment.kind.name(),
        title = deployment.title,
        query_dir = %config.query_dir.display(),
        "starting"
    );

    let mut sources = Sources::new();
    for database in deployment.databases {
        let profile = config.credentials.profile(database);
        let source = PgSource::connect(&profile, config.pool).await?;
        sources = sources.with(*database, Arc::new(source));
    }

    let today = Utc::now().date_naive();
    let state = match AppState::assemble(&deployment, config.query_dir.clone(), sources.clone(), today).await {
        Ok(state) => state,
        Err(err) => {
            sources.close().await;
            return Err(err.into());
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on http://{addr}{}", deployment.base_path);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sources.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
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
    info!("shutting down");
}

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use fulfillment_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.logging.json);

    // Init DB
    let db_config = api::db::DbConfig::from(&cfg);
    let db_pool = api::db::establish_connection_with_config(&db_config)
        .await
        .context("failed to connect to database")?;
    if cfg.database.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let executor = api::executor::BackgroundExecutor::new(cfg.executor.clone());
    let notifier = Arc::new(api::services::notifications::LoggingEmailNotifier::new(
        cfg.notifications.from_address.clone(),
    ));
    let gateway = Arc::new(api::services::payment_gateway::SimulatedPaymentGateway::new(
        cfg.business.payment_rejection_percent,
    ));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        &cfg,
        executor.clone(),
        notifier,
        gateway,
    );

    let addr = cfg.bind_address();
    let app_state = api::AppState {
        db: db_arc.clone(),
        config: Arc::new(cfg),
        services,
    };
    let app = api::build_router(app_state);

    // Bind and serve
    info!("fulfillment-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let queued notifications and audit records finish before exiting
    executor.shutdown().await;
    if let Ok(db) = Arc::try_unwrap(db_arc) {
        api::db::close_pool(db).await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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

use crate::cli::ServeArgs;
use crate::infra::{seed_catalog, AppState, LoggingNotifications};
use crate::routes::with_marketplace_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use marketplace_engine::config::AppConfig;
use marketplace_engine::error::AppError;
use marketplace_engine::marketplace::{
    InMemoryMarketplace, MarketplaceEngine, MarketplaceRepository, NotificationPublisher,
};
use marketplace_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = Arc::new(MarketplaceEngine::new(
        Arc::new(InMemoryMarketplace::default()),
        Arc::new(LoggingNotifications),
        config.engine,
    ));
    seed_catalog(engine.as_ref())?;
    spawn_expiry_sweeper(engine.clone(), config.engine.sweep_interval());

    let app = with_marketplace_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "marketplace engine ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Drives the expiry sweep on a fixed period. A failed run is logged and retried next tick.
fn spawn_expiry_sweeper<R, N>(engine: Arc<MarketplaceEngine<R, N>>, period: Duration)
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match engine.run_expiry_sweep() {
                Ok(summary) if !summary.is_empty() => {
                    info!(?summary, "scheduled expiry sweep applied changes");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "scheduled expiry sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

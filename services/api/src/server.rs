use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use tracing::{error, info};

use crate::cli::ServeArgs;
use crate::infra::{build_orchestrator, demo_sources, load_sources, ApiOrchestrator, AppState};
use crate::routes::with_cadence_routes;
use cadence::config::AppConfig;
use cadence::error::AppError;
use cadence::scheduler::CancellationFlag;
use cadence::telemetry;

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

    let (rules, debts) = match args.data_dir.take() {
        Some(dir) => load_sources(&dir)?,
        None => {
            info!("no data directory given, serving the demo portfolio");
            demo_sources()
        }
    };
    let orchestrator = build_orchestrator(&config.scheduler, rules, debts);
    let cancellation = orchestrator.cancellation();

    let pass_loop = tokio::spawn(run_pass_loop(
        orchestrator.clone(),
        config.scheduler.tick_interval_secs,
    ));

    let app = with_cadence_routes(orchestrator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "collection cadence scheduler ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancellation))
        .await?;

    pass_loop.abort();
    Ok(())
}

/// Periodic evaluation loop. Each tick runs one full pass; a failed pass
/// is logged and the loop keeps going.
async fn run_pass_loop(orchestrator: Arc<ApiOrchestrator>, tick_interval_secs: u64) {
    let cancellation = orchestrator.cancellation();
    let mut interval = tokio::time::interval(Duration::from_secs(tick_interval_secs.max(1)));

    loop {
        interval.tick().await;
        if cancellation.is_cancelled() {
            break;
        }
        match orchestrator.run_pass(Utc::now()).await {
            Ok(report) => info!(
                sent = report.steps_sent,
                failed = report.steps_failed,
                skipped = report.debts_skipped,
                "scheduled pass finished"
            ),
            Err(err) => error!(%err, "scheduled pass failed"),
        }
    }
}

/// Waits for Ctrl-C, then raises the cancellation flag so in-flight
/// passes stop claiming new steps before the server drains.
async fn shutdown_signal(cancellation: CancellationFlag) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested, cancelling scheduled passes");
    cancellation.cancel();
}

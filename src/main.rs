//! camwatch: binary entrypoint
//! Loads configuration, starts one worker per camera source and serves the
//! detection API until Ctrl-C / SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use camwatch::detector::http::HttpInferenceModel;
use camwatch::display::{self, LogPresenter};
use camwatch::metrics::Metrics;
use camwatch::source::snapshot::SnapshotSource;
use camwatch::{
    open_store, router, AppState, Deduplicator, Detector, MonitorConfig, Supervisor, SystemClock,
    WorkerDeps,
};

const INFERENCE_TIMEOUT: Duration = Duration::from_secs(15);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camwatch=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match MonitorConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    tracing::info!(
        sources = cfg.sources.len(),
        locations = cfg.locations.len(),
        timezone = %cfg.timezone,
        "configuration loaded"
    );

    let metrics = Metrics::init().context("installing metrics recorder")?;
    let store = open_store(&cfg.store_url, cfg.timezone)
        .await
        .context("opening event store")?;
    tracing::info!(backend = store.name(), "event store ready");

    let model = HttpInferenceModel::with_timeout(cfg.inference_url.clone(), INFERENCE_TIMEOUT)
        .context("building inference client")?;
    let detector = Detector::new(Arc::new(model), cfg.target_class);
    tracing::info!(
        model = detector.model_name(),
        target_class = detector.target_class(),
        "detector ready"
    );
    let frames = SnapshotSource::new(cfg.frame_interval, SNAPSHOT_TIMEOUT)
        .context("building snapshot client")?;

    let (sink, display_rx) = if cfg.display_queue > 0 {
        let (sink, rx) = display::channel(cfg.display_queue);
        (Some(sink), Some(rx))
    } else {
        (None, None)
    };

    let deps = WorkerDeps {
        frames: Arc::new(frames),
        detector,
        dedup: Deduplicator::new(store.clone(), cfg.store_timeout),
        clock: Arc::new(SystemClock::new(cfg.timezone)),
        display: sink,
        reconnect_delay: cfg.reconnect_delay,
    };

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::start(
        &cfg.sources,
        Arc::new(cfg.locations.clone()),
        deps,
        &shutdown,
    );

    let hub = display_rx.map(|rx| {
        display::spawn_hub(rx, LogPresenter, supervisor.stop_handles(), shutdown.clone())
    });

    let app = router(AppState {
        store,
        board: supervisor.board(),
        shutdown: shutdown.clone(),
    })
    .merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("binding {}", cfg.http_addr))?;
    tracing::info!(addr = %cfg.http_addr, "http server listening");

    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    supervisor.join().await;
    if let Some(hub) = hub {
        if let Err(e) = hub.await {
            tracing::warn!(error = %e, "display hub failed");
        }
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "http server error"),
        Err(e) => tracing::error!(error = %e, "http server task failed"),
    }

    tracing::info!("camwatch stopped");
    Ok(())
}

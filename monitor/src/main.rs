use axum::{routing::get, Router};
use clap::Parser;
use monitor::config::Config;
use monitor::connection::connection;
use monitor::metrics;
use monitor::page::{datetime_text, Elements, Page, SharedPage, UiSurface, DATETIME};
use monitor::rest::{self, AppState};
use monitor::series::Chart;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let session_id = uuid::Uuid::new_v4();
    info!("Starting telemetry monitor (session {})", session_id);
    info!("Gateway: {}", config.gateway());
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Series: {} (cap {}), reconnect delay: {}ms, post-connect: {:?}",
        config.series.join(","),
        config.series_cap,
        config.reconnect_delay_ms,
        config.post_connect.0
    );

    metrics::init_metrics();

    let page = Page::new(
        Chart::new(config.series.iter().cloned(), config.series_cap),
        Elements::dashboard(config.gpios.as_slice()),
    )
    .shared();

    let (handle, driver) = connection(config.connection_options(), page.clone());
    let connection_handle = tokio::spawn(driver.run());

    tokio::spawn(run_clock(page.clone()));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState::new(page, handle)));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = connection_handle => {
            error!("Connection task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

/// Refreshes the `datetime` card every second.
async fn run_clock(page: SharedPage) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let text = datetime_text(chrono::Local::now());
        if let Err(e) = page.write().await.elements.set_text(DATETIME, &text) {
            warn!("Clock stopped: {}", e);
            return;
        }
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

//! Profiling endpoints, mounted only when PPROF_DEBUG is set.

use axum::extract::Query;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::time::Duration;

const PPROF_ADDR: &str = "127.0.0.1:6060";

pub async fn serve_pprof() {
    let router = Router::new()
        .route("/debug/pprof/", get(index))
        .route("/debug/pprof/profile", get(profile));

    let listener = match tokio::net::TcpListener::bind(PPROF_ADDR).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("binding pprof debug server at {}: {}", PPROF_ADDR, e);
            return;
        }
    };

    tracing::info!("pprof debug server listening on {}", PPROF_ADDR);
    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!("pprof debug server: {}", e);
    }
}

async fn index() -> &'static str {
    "/debug/pprof/profile?seconds=N: CPU profile rendered as a flamegraph\n"
}

#[derive(Deserialize)]
struct ProfileParams {
    seconds: Option<u64>,
}

async fn profile(Query(params): Query<ProfileParams>) -> Response {
    let seconds = params.seconds.unwrap_or(10).clamp(1, 120);

    // The profiler guard stays on a blocking thread for its whole life.
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(99)
            .build()
            .map_err(|e| format!("starting profiler: {}", e))?;

        std::thread::sleep(Duration::from_secs(seconds));

        let report = guard
            .report()
            .build()
            .map_err(|e| format!("building profile report: {}", e))?;

        let mut svg = Vec::new();
        report
            .flamegraph(&mut svg)
            .map_err(|e| format!("rendering flamegraph: {}", e))?;
        Ok(svg)
    })
    .await;

    match result {
        Ok(Ok(svg)) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("profile task failed: {}\n", e),
        )
            .into_response(),
    }
}

//! Prometheus metrics for the coordinator and workers.

use axum::{body::Body, extract::Request, middleware::Next, response::Response, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Coordinator requests, by method.
pub static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("lta_requests", "coordinator requests", &["method"])
        .expect("metric registration cannot fail")
});

/// Coordinator responses, by method and status code.
pub static RESPONSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lta_responses",
        "coordinator responses",
        &["method", "response"]
    )
    .expect("metric registration cannot fail")
});

/// Worker processing successes.
pub static WORK_SUCCESSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lta_successes",
        "processing successes",
        &["component", "level", "type"]
    )
    .expect("metric registration cannot fail")
});

/// Worker processing failures.
pub static WORK_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lta_failures",
        "processing failures",
        &["component", "level", "type"]
    )
    .expect("metric registration cannot fail")
});

/// Items processed in the most recent work cycle.
pub static LOAD_GAUGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "lta_load_level",
        "work processed per cycle",
        &["component", "level", "type"]
    )
    .expect("metric registration cannot fail")
});

/// Axum middleware counting requests and responses.
pub async fn count_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    REQUESTS.with_label_values(&[&method]).inc();
    let response = next.run(request).await;
    RESPONSES
        .with_label_values(&[&method, response.status().as_str()])
        .inc();
    response
}

/// Serve the text-format metrics endpoint on its own port.
pub fn spawn_exporter(port: u16) {
    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(|| async {
                TextEncoder::new()
                    .encode_to_string(&prometheus::gather())
                    .unwrap_or_default()
            }),
        );
        match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                tracing::info!("metrics exporter listening on port {port}");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("metrics exporter failed: {e}");
                }
            }
            Err(e) => tracing::error!("could not bind metrics port {port}: {e}"),
        }
    });
}

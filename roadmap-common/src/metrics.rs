use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::health::HealthRegistry;

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router exposing prometheus metrics on `/metrics` and the liveness probe on `/_liveness`.
pub fn setup_metrics_router(
    recorder_handle: PrometheusHandle,
    liveness: HealthRegistry,
) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .route("/_liveness", get(move || std::future::ready(liveness.get_status())))
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

pub async fn index() -> &'static str {
    "roadmap worker"
}

/// Count and time requests to the metrics and liveness endpoints, labelled by route.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    // Unmatched paths share one label.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("roadmap_http_requests_total", &labels).increment(1);
    metrics::histogram!("roadmap_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt; // for `collect`
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt; // for `oneshot`

    fn router() -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        setup_metrics_router(handle, HealthRegistry::new("liveness"))
    }

    async fn request(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index() {
        let (status, body) = request(router(), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "roadmap worker");
    }

    #[tokio::test]
    async fn liveness_without_reports_is_unhealthy() {
        let (status, _) = request(router(), "/_liveness").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_route_passes_through_middleware() {
        let (status, _) = request(router(), "/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

use axum::{
    extract::DefaultBodyLimit,
    http::header::{HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN},
    http::{HeaderName, Method, Request, Response},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::api::assignments;
use crate::api::evaluations;
use crate::api::handlers;
use crate::core::{config::Settings, state::AppState};

// Room for every file part plus the text fields around them.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub(crate) fn router(state: AppState) -> Router {
    let cors = build_cors_layer(state.settings());
    let api_v1_prefix = state.settings().api().api_v1_str.clone();
    let api_v1 = Router::new().merge(assignments::router()).merge(evaluations::router());

    let request_id_header = HeaderName::from_static("x-request-id");
    let request_id_header_for_span = request_id_header.clone();
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<_>| {
            let request_id = request
                .headers()
                .get(&request_id_header_for_span)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(|response: &Response<axum::body::Body>, latency: Duration, _span: &Span| {
            let status_label = response.status().as_u16().to_string();
            metrics::counter!(
                "http_requests_total",
                "status" => status_label.clone()
            )
            .increment(1);
            metrics::histogram!(
                "http_request_duration_seconds",
                "status" => status_label
            )
            .record(latency.as_secs_f64());
        });

    let mut router: Router<AppState> = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz).head(handlers::healthz))
        .nest(&api_v1_prefix, api_v1)
        .layer(DefaultBodyLimit::max(body_limit(state.settings())))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(trace_layer)
        .layer(cors);

    if state.settings().telemetry().prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router.with_state(state)
}

fn body_limit(settings: &Settings) -> usize {
    let storage = settings.storage();
    let files = storage.max_images_per_evaluation.max(3);
    let limit = storage
        .max_upload_bytes()
        .saturating_mul(files)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings
        .cors()
        .origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, ORIGIN, HeaderName::from_static("x-request-id")])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        // Wildcard origin cannot be combined with allow_credentials
        base.allow_origin(Any)
    } else {
        base.allow_credentials(true).allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    use super::router;
    use crate::core::state::AppState;
    use crate::core::{config::Settings, metrics};
    use crate::services::text_extraction::OcrTextExtractor;
    use crate::test_support::{self, StubOracle};

    fn build_state(settings: Settings) -> AppState {
        AppState::new(
            settings,
            Arc::new(OcrTextExtractor::new(None, None, Duration::from_secs(60))),
            Arc::new(StubOracle::full_marks()),
        )
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let (app, _guard) = test_support::test_app(Arc::new(StubOracle::full_marks())).await;

        let response =
            app.oneshot(test_support::empty_request(Method::GET, "/")).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = test_support::read_json(response).await;
        assert_eq!(json["message"], "TeachTech Grader API");
        assert_eq!(json["endpoints"][0], "/api/v1/evaluate-assignment");
    }

    #[tokio::test]
    async fn healthz_reports_unconfigured_components() {
        let (app, _guard) = test_support::test_app(Arc::new(StubOracle::full_marks())).await;

        let response = app
            .oneshot(test_support::empty_request(Method::GET, "/healthz"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let json = test_support::read_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["scoring_model"], "not_configured");
        assert_eq!(json["components"]["storage"], "not_configured");
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let (app, _guard) = test_support::test_app(Arc::new(StubOracle::full_marks())).await;

        let response = app
            .oneshot(test_support::empty_request(Method::GET, "/metrics"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_returns_200() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROMETHEUS_ENABLED", "1");

        let settings = Settings::load().expect("settings");
        metrics::init(&settings).expect("metrics init");
        let app = router(build_state(settings));

        let response = app
            .oneshot(test_support::empty_request(Method::GET, "/metrics"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain; version=0.0.4");
    }
}

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::time::format_offset;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let api_v1 = &state.settings().api().api_v1_str;
    let response = RootResponse {
        message: state.settings().api().project_name.clone(),
        version: state.settings().api().version.clone(),
        endpoints: vec![format!("{api_v1}/evaluate-assignment"), format!("{api_v1}/evaluate")],
    };

    Json(response)
}

/// Reports which collaborators are configured. Missing ones degrade the
/// service without taking it down.
pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let settings = state.settings();
    let checks = [
        ("scoring_model", !settings.ai().api_key.is_empty() && !settings.ai().base_url.is_empty()),
        ("ocr", !settings.datalab().api_key.is_empty()),
        ("storage", settings.s3().has_credentials()),
    ];

    let mut status = "healthy";
    let mut components = BTreeMap::new();
    for (name, configured) in checks {
        if !configured {
            status = "degraded";
        }
        let value = if configured { "configured" } else { "not_configured" };
        components.insert(name.to_string(), value.to_string());
    }

    Json(HealthResponse {
        service: "teachtech-grader".to_string(),
        status: status.to_string(),
        checked_at: format_offset(OffsetDateTime::now_utc()),
        components,
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

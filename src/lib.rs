pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod parsing;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::ai_grading::AiGradingService;
use crate::services::text_extraction::OcrTextExtractor;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let extractor = OcrTextExtractor::from_settings(&settings).await?;
    let oracle = AiGradingService::from_settings(&settings)?;
    if settings.ai().api_key.is_empty() {
        tracing::warn!("AI_API_KEY missing; scoring requests will be rejected");
    }

    let state = AppState::new(settings, Arc::new(extractor), Arc::new(oracle));
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "TeachTech grader listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;

    tracing::info!("Server stopped");

    Ok(())
}

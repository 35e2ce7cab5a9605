use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::services::ai_grading::{
    CriteriaSpec, CriterionScore, OracleError, OracleVerdict, ScoringOracle, ScoringRequest,
};
use crate::services::text_extraction::OcrTextExtractor;

pub(crate) const MULTIPART_BOUNDARY: &str = "teachtech-test-boundary";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("TEACHTECH_ENV", "test");
    std::env::set_var("TEACHTECH_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("AWS_EC2_METADATA_DISABLED", "true");
    for key in [
        "ENVIRONMENT",
        "AI_API_KEY",
        "GEMINI_API_KEY",
        "AI_BASE_URL",
        "AI_MAX_RETRIES",
        "DATALAB_API_KEY",
        "DATALAB_BASE_URL",
        "DATALAB_POLL_INTERVAL_SECONDS",
        "DATALAB_MAX_POLL_ATTEMPTS",
        "DATALAB_MAX_SUBMIT_RETRIES",
        "S3_ENDPOINT",
        "S3_ACCESS_KEY",
        "S3_SECRET_KEY",
        "S3_BUCKET",
        "S3_REGION",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_S3_BUCKET_NAME",
        "AWS_REGION",
        "ALLOWED_DOCUMENT_EXTENSIONS",
        "MAX_UPLOAD_SIZE_MB",
        "MAX_IMAGES_PER_EVALUATION",
        "EVALUATION_TIMEOUT_SECONDS",
        "ORACLE_STRICT_VALIDATION",
        "MAX_EVALUATION_CRITERIA",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) fn set_test_storage_env() {
    std::env::set_var("S3_ENDPOINT", "http://localhost:9000");
    std::env::set_var("S3_ACCESS_KEY", "test-access-key");
    std::env::set_var("S3_SECRET_KEY", "test-secret-key");
    std::env::set_var("S3_BUCKET", "teachtech-test-bucket");
    std::env::set_var("S3_REGION", "eu-south-1");
}

/// Oracle double that awards full marks for every submitted criterion and
/// records each request it receives.
#[derive(Default)]
pub(crate) struct StubOracle {
    calls: StdMutex<Vec<ScoringRequest>>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    fixed: Option<OracleVerdict>,
}

impl StubOracle {
    pub(crate) fn full_marks() -> Self {
        Self::default()
    }

    pub(crate) fn returning(verdict: OracleVerdict) -> Self {
        Self { fixed: Some(verdict), ..Self::default() }
    }

    pub(crate) fn delay_for(mut self, identifier: &str, delay: Duration) -> Self {
        self.delays.insert(identifier.to_string(), delay);
        self
    }

    pub(crate) fn failing_on(mut self, identifier: &str) -> Self {
        self.failing.insert(identifier.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<ScoringRequest> {
        self.calls.lock().expect("stub oracle calls").clone()
    }

    fn full_marks_verdict(request: &ScoringRequest) -> OracleVerdict {
        let criteria_scores: Vec<CriterionScore> = match &request.criteria {
            CriteriaSpec::Marks(entries) => entries
                .iter()
                .map(|entry| CriterionScore {
                    criterion: entry.description.clone(),
                    score: entry.marks,
                    max_score: entry.marks,
                    justification: "Fully addressed".to_string(),
                })
                .collect(),
            CriteriaSpec::Weighted(items) => items
                .iter()
                .map(|item| {
                    let max_score = request.total_marks * item.weightage / 100.0;
                    CriterionScore {
                        criterion: item.name.clone(),
                        score: max_score,
                        max_score,
                        justification: "Fully addressed".to_string(),
                    }
                })
                .collect(),
        };
        let total_score = criteria_scores.iter().map(|score| score.score).sum();

        OracleVerdict { criteria_scores, total_score }
    }
}

#[async_trait]
impl ScoringOracle for StubOracle {
    async fn score(&self, request: &ScoringRequest) -> Result<OracleVerdict, OracleError> {
        self.calls.lock().expect("stub oracle calls").push(request.clone());

        if let Some(delay) = self.delays.get(request.label()) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(request.label()) {
            return Err(OracleError::Malformed("stubbed failure".to_string()));
        }

        Ok(self.fixed.clone().unwrap_or_else(|| Self::full_marks_verdict(request)))
    }
}

/// Builds a router backed by `oracle` and an extractor without storage or
/// OCR, so only plain-text uploads can be read.
pub(crate) async fn test_app(oracle: Arc<dyn ScoringOracle>) -> (Router, OwnedMutexGuard<()>) {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let extractor =
        Arc::new(OcrTextExtractor::new(None, None, Duration::from_secs(60)));
    let state = AppState::new(settings, extractor, oracle);

    (api::router::router(state), guard)
}

pub(crate) enum Part<'a> {
    Text(&'a str, &'a str),
    File { name: &'a str, filename: &'a str, content_type: &'a str, bytes: &'a [u8] },
}

pub(crate) fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File { name, filename, content_type, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"))
        .body(Body::from(body))
        .expect("request body")
}

pub(crate) fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).expect("request body")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

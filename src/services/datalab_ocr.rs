use anyhow::Context;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::Settings;
use crate::services::backoff_secs;

#[derive(Debug, Error)]
pub(crate) enum OcrError {
    #[error("failed to call DataLab marker API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("DataLab returned non-JSON body (status {status}): {body}")]
    NonJson { status: u16, body: String },
    #[error("DataLab marker submit failed: {0}")]
    Submit(String),
    #[error("DataLab OCR job {request_id} failed: {message}")]
    JobFailed { request_id: String, message: String },
    #[error("DataLab OCR polling timed out for request {request_id} after {attempts} attempts")]
    PollTimeout { request_id: String, attempts: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct MarkerOutput {
    pub(crate) markdown: Option<String>,
    pub(crate) model: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DatalabOcrService {
    client: Client,
    api_key: String,
    base_url: String,
    mode: String,
    output_format: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_submit_retries: u32,
}

#[derive(Debug, Clone)]
struct MarkerJobRef {
    request_id: String,
    request_check_url: String,
}

impl DatalabOcrService {
    /// Returns `None` when no DataLab key is configured.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.datalab().api_key.is_empty() {
            return Ok(None);
        }

        let timeout = Duration::from_secs(settings.datalab().timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(timeout)
            .build()
            .context("Failed to build DataLab HTTP client")?;

        Ok(Some(Self {
            client,
            api_key: settings.datalab().api_key.clone(),
            base_url: settings.datalab().base_url.trim_end_matches('/').to_string(),
            mode: settings.datalab().mode.clone(),
            output_format: settings.datalab().output_format.clone(),
            poll_interval: Duration::from_secs(settings.datalab().poll_interval_seconds),
            max_poll_attempts: settings.datalab().max_poll_attempts,
            max_submit_retries: settings.datalab().max_submit_retries,
        }))
    }

    pub(crate) async fn run_marker_for_file_url(
        &self,
        file_url: &str,
    ) -> Result<MarkerOutput, OcrError> {
        let job_ref = self.submit_marker_job(file_url).await?;
        tracing::debug!(request_id = %job_ref.request_id, "DataLab marker job submitted");
        self.poll_marker_result(&job_ref).await
    }

    async fn submit_marker_job(&self, file_url: &str) -> Result<MarkerJobRef, OcrError> {
        let endpoint = format!("{}/marker", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_submit_retries {
            let form = Form::new()
                .text("file_url", file_url.to_string())
                .text("mode", self.mode.clone())
                .text("output_format", self.output_format.clone());

            let outcome = match self
                .client
                .post(&endpoint)
                .header("X-Api-Key", &self.api_key)
                .multipart(form)
                .send()
                .await
            {
                Ok(response) => self.read_submit_response(response).await,
                Err(err) => Err(OcrError::from(err)),
            };

            match outcome {
                Ok(job_ref) => return Ok(job_ref),
                Err(err) => {
                    tracing::warn!(error = %err, attempt, "DataLab marker submit attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt < self.max_submit_retries {
                tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| OcrError::Submit("unknown submit error".to_string())))
    }

    async fn read_submit_response(
        &self,
        response: reqwest::Response,
    ) -> Result<MarkerJobRef, OcrError> {
        let status = response.status();
        let parsed = read_json_body(response).await?;

        if !status.is_success() {
            return Err(OcrError::Submit(format!(
                "status {}: {}",
                status.as_u16(),
                extract_error_message(&parsed)
            )));
        }
        if reports_failure(&parsed) {
            return Err(OcrError::Submit(extract_error_message(&parsed)));
        }

        extract_marker_job_ref(&self.base_url, &parsed)
            .ok_or_else(|| OcrError::Submit("response missing request reference".to_string()))
    }

    async fn poll_marker_result(&self, job_ref: &MarkerJobRef) -> Result<MarkerOutput, OcrError> {
        for attempt in 0..self.max_poll_attempts {
            let response = self
                .client
                .get(&job_ref.request_check_url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await?;

            let status_code = response.status();
            let parsed = read_json_body(response).await?;

            if !status_code.is_success() {
                return Err(OcrError::JobFailed {
                    request_id: job_ref.request_id.clone(),
                    message: format!(
                        "poll status {}: {}",
                        status_code.as_u16(),
                        extract_error_message(&parsed)
                    ),
                });
            }

            let status = parsed
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| "unknown".to_string());

            match status.as_str() {
                "complete" | "completed" => return Ok(extract_result_payload(&parsed)),
                "failed" | "error" => {
                    return Err(OcrError::JobFailed {
                        request_id: job_ref.request_id.clone(),
                        message: extract_error_message(&parsed),
                    })
                }
                _ if reports_failure(&parsed) => {
                    return Err(OcrError::JobFailed {
                        request_id: job_ref.request_id.clone(),
                        message: extract_error_message(&parsed),
                    })
                }
                _ => {}
            }

            if attempt + 1 >= self.max_poll_attempts {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(OcrError::PollTimeout {
            request_id: job_ref.request_id.clone(),
            attempts: self.max_poll_attempts,
        })
    }
}

async fn read_json_body(response: reqwest::Response) -> Result<Value, OcrError> {
    let status = response.status();
    let raw_body = response.text().await?;
    serde_json::from_str(&raw_body)
        .map_err(|_| OcrError::NonJson { status: status.as_u16(), body: raw_body })
}

fn reports_failure(payload: &Value) -> bool {
    payload.get("success").and_then(Value::as_bool).is_some_and(|value| !value)
}

fn extract_marker_job_ref(base_url: &str, payload: &Value) -> Option<MarkerJobRef> {
    let request_check_url = extract_request_check_url(base_url, payload);
    let request_id = extract_request_id(payload).or_else(|| {
        request_check_url
            .as_deref()
            .and_then(|url| url.trim_end_matches('/').rsplit('/').next().map(ToString::to_string))
    })?;

    let request_check_url =
        request_check_url.unwrap_or_else(|| format!("{base_url}/marker/{request_id}"));

    Some(MarkerJobRef { request_id, request_check_url })
}

fn extract_request_check_url(base_url: &str, payload: &Value) -> Option<String> {
    let raw = payload.get("request_check_url").and_then(Value::as_str)?;
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    let normalized_base = format!("{}/", base_url.trim_end_matches('/'));
    reqwest::Url::parse(&normalized_base)
        .ok()
        .and_then(|base| base.join(raw).ok())
        .map(|url| url.to_string())
}

fn extract_request_id(payload: &Value) -> Option<String> {
    ["request_id", "request_check_id"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(ToString::to_string)
}

fn extract_result_payload(payload: &Value) -> MarkerOutput {
    let container = payload.get("result").unwrap_or(payload);
    let field = |name: &str| {
        container
            .get(name)
            .or_else(|| payload.get(name))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };

    MarkerOutput { markdown: field("markdown"), model: field("model") }
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

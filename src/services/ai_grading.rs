use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;
use crate::services::backoff_secs;
use crate::parsing::CriterionEntry;
use crate::schemas::evaluation::{EvaluationCriterionInput, Language, Subject};

const EXPERT_SYSTEM_PROMPT: &str = r#"You are an expert teacher who understands Italian and English well, tasked with evaluating a student's answer.
Base your evaluation on the provided question, answer and evaluation criteria. The question and the criteria can be written in Italian or English.

Instructions:
- If the answer is not relevant to the question, do not evaluate it further and assign zero marks.
- Evaluate the answer against each evaluation criterion and assign marks out of the marks written for that criterion.
- Justify every score with a brief explanation of how the answer meets or fails to meet the criterion.
- Sum the scores of all criteria to obtain the final score out of the total score.
- Copy each criterion text exactly into the "criterion" field.

Write the justifications in Italian."#;

const SUBJECT_SYSTEM_PROMPT: &str = r#"You are a {language} {subject} teacher who understands Italian and English well, tasked with evaluating a student's answer.
Base your evaluation on the provided question, answer and evaluation criteria. The question and the criteria can be written in Italian or English.

Instructions:
- If the answer is not relevant to the question, do not evaluate it further and assign zero marks.
- Assign a score for each criterion out of its weighted percentage of the total score.
- Justify every score with a brief explanation of how the answer meets or fails to meet the criterion.
- Sum the scores of all criteria to obtain the final score out of the total score.
- Copy each criterion name exactly into the "criterion" field.

Write the justifications in {language}."#;

const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object and nothing else:
{
  "criteria_scores": [
    {
      "criterion": "<criterion>",
      "score": <number awarded>,
      "max_score": <maximum for this criterion>,
      "justification": "<why this score was awarded>"
    }
  ],
  "total_score": <final score out of the total score>
}"#;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub(crate) enum CriteriaSpec {
    Marks(Vec<CriterionEntry>),
    Weighted(Vec<EvaluationCriterionInput>),
}

impl CriteriaSpec {
    /// Maximum score each submitted criterion may earn. Weighted criteria
    /// take their share of `total_marks`.
    pub(crate) fn limits(&self, total_marks: f64) -> Vec<(&str, f64)> {
        match self {
            Self::Marks(entries) => {
                entries.iter().map(|entry| (entry.description.as_str(), entry.marks)).collect()
            }
            Self::Weighted(items) => items
                .iter()
                .map(|item| (item.name.as_str(), total_marks * item.weightage / 100.0))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Persona {
    Expert,
    Subject { language: Language, subject: Subject },
}

#[derive(Debug, Clone)]
pub(crate) struct ScoringRequest {
    pub(crate) identifier: Option<String>,
    pub(crate) question: String,
    pub(crate) answer: String,
    pub(crate) criteria: CriteriaSpec,
    pub(crate) total_marks: f64,
    pub(crate) persona: Persona,
}

impl ScoringRequest {
    pub(crate) fn label(&self) -> &str {
        self.identifier.as_deref().unwrap_or("single")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CriterionScore {
    pub(crate) criterion: String,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OracleVerdict {
    pub(crate) criteria_scores: Vec<CriterionScore>,
    pub(crate) total_score: f64,
}

#[derive(Debug, Error)]
pub(crate) enum OracleError {
    #[error("scoring model is not configured")]
    NotConfigured,
    #[error("failed to call scoring API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("scoring API error (status {status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("malformed scoring response: {0}")]
    Malformed(String),
}

impl OracleError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured | Self::Malformed(_) => false,
        }
    }
}

/// Scores one question/answer/criteria triple.
#[async_trait]
pub(crate) trait ScoringOracle: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> Result<OracleVerdict, OracleError>;
}

/// OpenAI-compatible chat completion client used as the scoring oracle.
#[derive(Debug, Clone)]
pub(crate) struct AiGradingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    max_retries: u32,
}

impl AiGradingService {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.ai().request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().api_key.clone(),
            base_url: settings.ai().base_url.trim_end_matches('/').to_string(),
            model: settings.ai().model.clone(),
            max_tokens: settings.ai().max_tokens,
            temperature: settings.ai().temperature,
            max_retries: settings.ai().max_retries,
        })
    }

    async fn post_with_retries(&self, url: &str, payload: &Value) -> Result<Value, OracleError> {
        let mut attempt = 0;
        loop {
            match self.post_once(url, payload).await {
                Ok(body) => return Ok(body),
                Err(err) if attempt < self.max_retries && err.is_retryable() => {
                    tracing::warn!(error = %err, attempt, "Scoring request failed, retrying");
                    tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once(&self, url: &str, payload: &Value) -> Result<Value, OracleError> {
        let response = self.client.post(url).bearer_auth(&self.api_key).json(payload).send().await?;

        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(OracleError::Api {
                status: status.as_u16(),
                detail: extract_error_message(&body),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ScoringOracle for AiGradingService {
    async fn score(&self, request: &ScoringRequest) -> Result<OracleVerdict, OracleError> {
        if self.api_key.is_empty() || self.base_url.is_empty() {
            return Err(OracleError::NotConfigured);
        }

        let timer = Instant::now();
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(request.persona)},
                {"role": "user", "content": user_prompt(request)}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": 1,
            "response_format": {"type": "json_object"}
        });

        tracing::info!(question = %request.label(), model = %self.model, "Sending scoring request");

        let url = format!("{}/chat/completions", self.base_url);
        let outcome = match self.post_with_retries(&url, &payload).await {
            Ok(body) => parse_completion(&body).map(|verdict| (verdict, tokens_used(&body))),
            Err(err) => Err(err),
        };

        let elapsed = timer.elapsed().as_secs_f64();
        metrics::histogram!("oracle_duration_seconds").record(elapsed);

        match outcome {
            Ok((verdict, tokens_used)) => {
                metrics::counter!("oracle_requests_total", "status" => "success").increment(1);
                tracing::info!(
                    question = %request.label(),
                    duration_seconds = elapsed,
                    tokens_used = ?tokens_used,
                    total_score = verdict.total_score,
                    "Scoring completed"
                );
                Ok(verdict)
            }
            Err(err) => {
                metrics::counter!("oracle_requests_total", "status" => "failed").increment(1);
                tracing::error!(question = %request.label(), error = %err, "Scoring failed");
                Err(err)
            }
        }
    }
}

fn system_prompt(persona: Persona) -> String {
    let base = match persona {
        Persona::Expert => EXPERT_SYSTEM_PROMPT.to_string(),
        Persona::Subject { language, subject } => SUBJECT_SYSTEM_PROMPT
            .replace("{language}", language.label())
            .replace("{subject}", subject.label()),
    };
    format!("{base}\n\n{FORMAT_INSTRUCTIONS}")
}

fn user_prompt(request: &ScoringRequest) -> String {
    format!(
        "The total score is {} points.\n\nEvaluation details:\nquestion: {}\nanswer: {}\nevaluation criteria: {}\n",
        request.total_marks,
        request.question,
        request.answer,
        serde_json::to_string_pretty(&request.criteria).unwrap_or_default()
    )
}

fn parse_completion(body: &Value) -> Result<OracleVerdict, OracleError> {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::Malformed("missing message content".to_string()))?;

    serde_json::from_str(strip_code_fence(content))
        .map_err(|err| OracleError::Malformed(err.to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn tokens_used(body: &Value) -> Option<u64> {
    body.get("usage").and_then(|usage| usage.get("total_tokens")).and_then(Value::as_u64)
}

fn extract_error_message(body: &Value) -> String {
    let error = body.get("error");
    error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .map(ToString::to_string)
        .unwrap_or_else(|| body.to_string())
}

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::time::unix_millis;
use crate::services::datalab_ocr::{DatalabOcrService, OcrError};
use crate::services::storage::StorageService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocumentKind {
    Question,
    Answer,
    Criteria,
    Solution,
}

impl DocumentKind {
    pub(crate) fn key_prefix(self) -> &'static str {
        match self {
            Self::Question => "questions/",
            Self::Answer => "answers/",
            Self::Criteria => "criteria/",
            Self::Solution => "solutions/",
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Criteria => "criteria",
            Self::Solution => "solution",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UploadedDocument {
    pub(crate) kind: DocumentKind,
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

impl UploadedDocument {
    fn is_plain_text(&self) -> bool {
        self.content_type.starts_with("text/plain")
            || self.filename.to_ascii_lowercase().ends_with(".txt")
    }
}

#[derive(Debug, Error)]
pub(crate) enum ExtractionError {
    #[error("document storage is not configured")]
    StorageUnavailable,
    #[error("OCR service is not configured")]
    OcrUnavailable,
    #[error("failed to store {key}: {message}")]
    Storage { key: String, message: String },
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("{filename} is not valid UTF-8 text")]
    InvalidText { filename: String },
}

impl ExtractionError {
    pub(crate) fn is_unconfigured(&self) -> bool {
        matches!(self, Self::StorageUnavailable | Self::OcrUnavailable)
    }
}

/// Turns one uploaded document into plain text.
#[async_trait]
pub(crate) trait TextExtractor: Send + Sync {
    async fn extract_text(&self, document: UploadedDocument) -> Result<String, ExtractionError>;
}

/// Archives documents in object storage and runs DataLab marker OCR on a
/// presigned URL. Plain-text uploads skip OCR.
#[derive(Debug, Clone)]
pub(crate) struct OcrTextExtractor {
    storage: Option<StorageService>,
    ocr: Option<DatalabOcrService>,
    presign_ttl: Duration,
}

impl OcrTextExtractor {
    pub(crate) fn new(
        storage: Option<StorageService>,
        ocr: Option<DatalabOcrService>,
        presign_ttl: Duration,
    ) -> Self {
        Self { storage, ocr, presign_ttl }
    }

    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let storage = StorageService::from_settings(settings).await?;
        let ocr = DatalabOcrService::from_settings(settings)?;
        if storage.is_none() {
            tracing::warn!("S3 credentials missing; OCR uploads are disabled");
        }
        if ocr.is_none() {
            tracing::warn!("DATALAB_API_KEY missing; OCR is disabled");
        }

        let presign_ttl =
            Duration::from_secs(settings.storage().presigned_url_expire_minutes.max(1) * 60);
        Ok(Self::new(storage, ocr, presign_ttl))
    }

    async fn archive(
        storage: &StorageService,
        key: &str,
        document: &UploadedDocument,
    ) -> Result<(), ExtractionError> {
        let stored = storage
            .upload_bytes(key, &document.content_type, document.bytes.clone())
            .await
            .map_err(|err| ExtractionError::Storage {
                key: key.to_string(),
                message: format!("{err:#}"),
            })?;

        tracing::debug!(
            bucket = %storage.bucket(),
            key = %stored.key,
            size = stored.size,
            sha256 = %stored.sha256,
            "Document archived"
        );
        Ok(())
    }
}

#[async_trait]
impl TextExtractor for OcrTextExtractor {
    async fn extract_text(&self, document: UploadedDocument) -> Result<String, ExtractionError> {
        let key = object_key(document.kind, &document.filename, OffsetDateTime::now_utc());

        if document.is_plain_text() {
            let text = std::str::from_utf8(&document.bytes)
                .map_err(|_| ExtractionError::InvalidText { filename: document.filename.clone() })?
                .to_string();
            if let Some(storage) = &self.storage {
                Self::archive(storage, &key, &document).await?;
            }
            metrics::counter!("documents_extracted_total", "source" => "text").increment(1);
            return Ok(text);
        }

        let storage = self.storage.as_ref().ok_or(ExtractionError::StorageUnavailable)?;
        let ocr = self.ocr.as_ref().ok_or(ExtractionError::OcrUnavailable)?;

        Self::archive(storage, &key, &document).await?;
        let url = storage.presign_get(&key, self.presign_ttl).await.map_err(|err| {
            ExtractionError::Storage { key: key.clone(), message: format!("{err:#}") }
        })?;

        let output = match ocr.run_marker_for_file_url(&url).await {
            Ok(output) => output,
            Err(err) => {
                metrics::counter!("documents_extracted_total", "source" => "ocr_failed")
                    .increment(1);
                return Err(err.into());
            }
        };

        let text = flatten_markdown(output.markdown.as_deref().unwrap_or_default());
        if text.is_empty() {
            tracing::warn!(key = %key, kind = document.kind.as_str(), "OCR produced no text");
        }
        tracing::info!(
            key = %key,
            kind = document.kind.as_str(),
            model = output.model.as_deref().unwrap_or("unknown"),
            chars = text.len(),
            "Document text extracted"
        );
        metrics::counter!("documents_extracted_total", "source" => "ocr").increment(1);

        Ok(text)
    }
}

pub(crate) fn object_key(kind: DocumentKind, filename: &str, now: OffsetDateTime) -> String {
    format!(
        "{}{}-{}_{}",
        kind.key_prefix(),
        unix_millis(now),
        Uuid::new_v4(),
        sanitized_filename(filename)
    )
}

pub(crate) fn sanitized_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect();

    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Strips markdown decoration from OCR output while keeping line structure,
/// so `**Answer 1(a):**` reads as `Answer 1(a):` at the start of its line.
pub(crate) fn flatten_markdown(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|line| !is_table_rule(line))
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches('#').trim_start();
            let line = line.strip_prefix("> ").unwrap_or(line);
            let line = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .unwrap_or(line);
            line.replace("**", "")
                .replace("__", "")
                .replace('`', "")
                .replace("<br>", " ")
                .replace('|', " ")
                .trim()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_table_rule(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('-')
        && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && trimmed.contains('|')
}

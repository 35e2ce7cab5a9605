use std::collections::HashMap;

use axum::extract::Multipart;

use crate::api::errors::ApiError;
use crate::api::validation::validate_document_upload;
use crate::core::config::StorageSettings;
use crate::services::text_extraction::{DocumentKind, UploadedDocument};

#[derive(Debug)]
pub(crate) struct FormFile {
    pub(crate) field: String,
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

impl FormFile {
    /// Validates the upload against the configured extension list and turns
    /// it into a document for text extraction.
    pub(crate) fn into_document(
        self,
        kind: DocumentKind,
        storage: &StorageSettings,
    ) -> Result<UploadedDocument, ApiError> {
        validate_document_upload(
            &self.filename,
            &self.content_type,
            &storage.allowed_document_extensions,
        )?;
        if self.bytes.is_empty() {
            return Err(ApiError::BadRequest(format!("File '{}' is empty", self.field)));
        }

        Ok(UploadedDocument {
            kind,
            filename: self.filename,
            content_type: self.content_type,
            bytes: self.bytes,
        })
    }
}

/// Multipart body split into text fields and file parts, in arrival order.
#[derive(Debug, Default)]
pub(crate) struct MultipartForm {
    texts: HashMap<String, String>,
    files: Vec<FormFile>,
}

impl MultipartForm {
    pub(crate) async fn read(
        multipart: &mut Multipart,
        storage: &StorageSettings,
    ) -> Result<Self, ApiError> {
        let max_bytes = storage.max_upload_bytes();
        let mut form = Self::default();

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
        {
            let name = field.name().unwrap_or("").to_string();

            let Some(filename) = field.file_name().map(ToString::to_string) else {
                let text = field.text().await.map_err(|_| {
                    ApiError::BadRequest(format!("Failed to read field '{name}'"))
                })?;
                form.texts.insert(name, text);
                continue;
            };

            let content_type = field
                .content_type()
                .map(ToString::to_string)
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
            {
                let next_size = bytes.len() as u64 + chunk.len() as u64;
                if next_size > max_bytes {
                    return Err(ApiError::BadRequest(format!(
                        "File size exceeds {}MB limit",
                        storage.max_upload_size_mb
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            form.files.push(FormFile { field: name, filename, content_type, bytes });
        }

        Ok(form)
    }

    pub(crate) fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).map(String::as_str)
    }

    pub(crate) fn required_text(&self, name: &str) -> Result<&str, ApiError> {
        self.text(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
    }

    pub(crate) fn take_file(&mut self, name: &str) -> Result<FormFile, ApiError> {
        let position = self
            .files
            .iter()
            .position(|file| file.field == name)
            .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))?;
        Ok(self.files.remove(position))
    }

    pub(crate) fn take_files_with_suffix(&mut self, suffix: &str) -> Vec<FormFile> {
        let (matching, rest): (Vec<FormFile>, Vec<FormFile>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|file| file.field.ends_with(suffix));
        self.files = rest;
        matching
    }
}

//! Buffered multipart form reader shared by the form-posting endpoints.

use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// All fields of a multipart body. Parts carrying a file name are files;
/// everything else is text. Browsers send empty file parts for untouched
/// inputs; those are dropped.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<UploadedFile>>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            if file_name.is_some() {
                let bytes = field.bytes().await?;
                if bytes.is_empty() && file_name.as_deref() == Some("") {
                    continue;
                }
                form.files.entry(name).or_default().push(UploadedFile {
                    file_name,
                    content_type,
                    bytes,
                });
            } else {
                form.fields.insert(name, field.text().await?);
            }
        }
        Ok(form)
    }

    /// Text value, `None` when missing or blank.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require_text(&self, name: &str) -> Result<&str, AppError> {
        self.text(name)
            .ok_or_else(|| AppError::Validation(format!("Missing required field '{name}'")))
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name).and_then(|files| files.first())
    }

    pub fn require_file(&self, name: &str) -> Result<&UploadedFile, AppError> {
        self.file(name)
            .ok_or_else(|| AppError::Validation(format!("Missing required file '{name}'")))
    }

    pub fn files(&self, name: &str) -> &[UploadedFile] {
        self.files.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

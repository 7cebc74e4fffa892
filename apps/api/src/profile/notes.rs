//! Decoding of uploaded clinical-notes files.

use tracing::warn;

use crate::routes::form::UploadedFile;

fn is_pdf(file: &UploadedFile) -> bool {
    file.content_type.as_deref() == Some("application/pdf")
        || file
            .file_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().ends_with(".pdf"))
        || file.bytes.starts_with(b"%PDF")
}

/// Text of a notes upload: PDFs through `pdf-extract`, anything else as
/// lossy UTF-8. Unreadable files yield `None`.
pub async fn read_notes_file(file: &UploadedFile) -> Option<String> {
    if !is_pdf(file) {
        return Some(String::from_utf8_lossy(&file.bytes).into_owned());
    }

    let bytes = file.bytes.clone();
    match tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes)).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            warn!("Ignoring unreadable PDF notes file: {e}");
            None
        }
        Err(e) => {
            warn!("PDF extraction task failed: {e}");
            None
        }
    }
}

/// Typed notes followed by the uploaded file's text.
pub fn combine_notes(typed: &str, file_text: Option<&str>) -> String {
    match file_text {
        Some(extra) => format!("{typed}\n{extra}").trim().to_string(),
        None => typed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn upload(name: &str, content_type: &str, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: Some(name.to_string()),
            content_type: Some(content_type.to_string()),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn test_plain_text_notes() {
        let file = upload("notes.txt", "text/plain", b"Fever for 3 days.");
        assert_eq!(read_notes_file(&file).await.as_deref(), Some("Fever for 3 days."));
    }

    #[tokio::test]
    async fn test_broken_pdf_is_ignored() {
        let file = upload("notes.pdf", "application/pdf", b"%PDF-1.4 truncated");
        assert_eq!(read_notes_file(&file).await, None);
    }

    #[test]
    fn test_combine_notes() {
        assert_eq!(combine_notes("typed", Some("from file")), "typed\nfrom file");
        assert_eq!(combine_notes("", Some("from file")), "from file");
        assert_eq!(combine_notes("typed", None), "typed");
    }
}

//! Documents the user hands to the assistant.

use crate::connection::protocol::Outbound;
use crate::error::{Result, VocalisError};
use crate::session::state::DocumentKind;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// A document read and encoded, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub kind: DocumentKind,
    /// Base64 of the file contents
    pub data: String,
}

impl Document {
    /// Validate and encode raw file contents.
    ///
    /// # Errors
    /// `VocalisError::Upload` for an empty file or a PDF without the `%PDF-`
    /// signature.
    pub fn from_bytes(kind: DocumentKind, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(VocalisError::Upload {
                message: format!("The {} file is empty.", kind),
            });
        }
        if kind == DocumentKind::Pdf && !bytes.starts_with(PDF_MAGIC) {
            return Err(VocalisError::Upload {
                message: "Please upload a valid PDF file.".to_string(),
            });
        }
        Ok(Self {
            kind,
            data: STANDARD.encode(bytes),
        })
    }

    /// Read a file from disk without blocking the runtime.
    pub async fn read(path: &Path, kind: DocumentKind) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| VocalisError::Upload {
            message: format!("Error reading {} file {}: {}", kind, path.display(), e),
        })?;
        Self::from_bytes(kind, &bytes)
    }

    pub fn to_message(&self) -> Outbound {
        match self.kind {
            DocumentKind::Pdf => Outbound::Pdf {
                pdf_base64: self.data.clone(),
            },
            DocumentKind::Image => Outbound::VisionImage {
                image_data: self.data.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_pdf_requires_signature() {
        let err = Document::from_bytes(DocumentKind::Pdf, b"<html>").unwrap_err();
        assert_eq!(err.to_string(), "Upload failed: Please upload a valid PDF file.");

        let doc = Document::from_bytes(DocumentKind::Pdf, b"%PDF-1.7\n...").unwrap();
        assert_eq!(doc.data, STANDARD.encode(b"%PDF-1.7\n..."));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(Document::from_bytes(DocumentKind::Image, b"").is_err());
    }

    #[test]
    fn test_message_matches_kind() {
        let pdf = Document::from_bytes(DocumentKind::Pdf, b"%PDF-1.4").unwrap();
        assert!(matches!(pdf.to_message(), Outbound::Pdf { .. }));

        let image = Document::from_bytes(DocumentKind::Image, &[0x89, b'P', b'N', b'G']).unwrap();
        assert_eq!(
            image.to_message(),
            Outbound::VisionImage {
                image_data: STANDARD.encode([0x89, b'P', b'N', b'G'])
            }
        );
    }

    #[tokio::test]
    async fn test_read_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.5 body").unwrap();

        let doc = Document::read(file.path(), DocumentKind::Pdf).await.unwrap();
        assert_eq!(doc.kind, DocumentKind::Pdf);
    }

    #[tokio::test]
    async fn test_missing_file_is_upload_error() {
        let result = Document::read(Path::new("/nonexistent/vocalis.pdf"), DocumentKind::Pdf).await;
        assert!(matches!(result, Err(VocalisError::Upload { .. })));
    }
}

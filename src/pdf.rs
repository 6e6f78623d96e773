//! PDF validation and text extraction.
//!
//! Uploads are checked against the configured size ceiling and the `%PDF`
//! magic before any parsing. Extraction runs on a blocking worker thread;
//! a large rulebook can take long enough to matter on the request path.

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Reject uploads that are too large or are not PDF files.
pub fn validate_pdf(bytes: &[u8], max_bytes: usize) -> Result<()> {
    if bytes.len() > max_bytes {
        return Err(Error::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(Error::UnsupportedFormat(
            "file does not appear to be a valid PDF".to_string(),
        ));
    }

    Ok(())
}

/// Extract plain text from PDF bytes, page order preserved.
///
/// Returns [`Error::EmptyDocument`] when the PDF parses but yields no text
/// (e.g. a scanned image-only document).
pub async fn extract_text(bytes: Vec<u8>) -> Result<String> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("extraction task failed: {e}")))?
        .map_err(|e| Error::UnsupportedFormat(format!("PDF extraction failed: {e}")))?;

    if text.trim().is_empty() {
        return Err(Error::EmptyDocument);
    }

    Ok(text)
}

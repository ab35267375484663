//! Text extraction seam.
//!
//! The scanner consumes the [`TextExtractor`] contract and knows nothing
//! about individual formats. The built-in implementation handles plain
//! textual types; richer format support (PDF, DOCX, ...) plugs in behind
//! the same trait.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// What an extractor produced for one file.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Detected MIME type, if any.
    pub mime: Option<String>,
    /// Decoded text, `None` for non-textual content.
    pub text: Option<String>,
}

/// Synchronous, side-effect-free text extraction.
pub trait TextExtractor: Send + Sync {
    /// Extract up to `max_bytes` of decoded text from the file.
    fn extract(&self, path: &Path, max_bytes: usize) -> Result<Extraction>;
}

/// MIME prefixes and exact types treated as textual.
const TEXT_MIME_PREFIXES: &[&str] = &["text/"];
const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-yaml",
    "application/toml",
];

fn is_textual(mime: &str) -> bool {
    TEXT_MIME_PREFIXES.iter().any(|p| mime.starts_with(p))
        || TEXT_MIME_TYPES.contains(&mime)
}

/// Extractor for plain textual files.
///
/// Detects the MIME type from the path, reads at most `max_bytes`, decodes
/// lossily as UTF-8, and collapses whitespace runs. Anything that decodes
/// to an empty string is reported as non-textual.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, max_bytes: usize) -> Result<Extraction> {
        let mime = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string());

        let textual = mime.as_deref().map(is_textual).unwrap_or(false);
        if !textual {
            return Ok(Extraction { mime, text: None });
        }

        let mut file = std::fs::File::open(path)?;
        let mut raw = vec![0u8; max_bytes];
        let mut read = 0;
        loop {
            let n = file
                .read(&mut raw[read..])
                .map_err(|e| Error::Extractor(format!("{}: {}", path.display(), e)))?;
            if n == 0 {
                break;
            }
            read += n;
            if read == raw.len() {
                break;
            }
        }
        raw.truncate(read);

        let decoded = String::from_utf8_lossy(&raw);
        let mut cleaned = decoded.split_whitespace().collect::<Vec<_>>().join(" ");

        // Lossy decoding can expand invalid bytes into multi-byte
        // replacement characters; enforce the byte bound on the result.
        if cleaned.len() > max_bytes {
            let mut end = max_bytes;
            while !cleaned.is_char_boundary(end) {
                end -= 1;
            }
            cleaned.truncate(end);
        }

        let text = if cleaned.is_empty() { None } else { Some(cleaned) };
        Ok(Extraction { mime, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_mimes() {
        assert!(is_textual("text/plain"));
        assert!(is_textual("text/markdown"));
        assert!(is_textual("application/json"));
        assert!(!is_textual("image/png"));
        assert!(!is_textual("application/octet-stream"));
    }

    #[test]
    fn extracts_and_normalizes_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "alpha\n\n  beta\tgamma ").unwrap();

        let extraction = PlainTextExtractor.extract(&path, 8192).unwrap();
        assert_eq!(extraction.mime.as_deref(), Some("text/plain"));
        assert_eq!(extraction.text.as_deref(), Some("alpha beta gamma"));
    }

    #[test]
    fn truncates_to_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(100)).unwrap();

        let extraction = PlainTextExtractor.extract(&path, 10).unwrap();
        assert_eq!(extraction.text.as_deref(), Some("xxxxxxxxxx"));
    }

    #[test]
    fn binary_extension_yields_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let extraction = PlainTextExtractor.extract(&path, 8192).unwrap();
        assert!(extraction.text.is_none());
    }
}

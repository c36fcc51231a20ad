//! Upload admission policy: MIME allow-list and size limits.
//!
//! Checked before any cryptographic work, so a rejected upload has no side effects.

use crate::config::PolicyConfig;
use crate::error::{CustodyError, CustodyResult};

/// MIME types accepted when no allow-list is configured
pub const DEFAULT_ALLOWED_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/jpg",
    "video/mp4",
    "video/mkv",
    "video/webm",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "audio/mpeg",
    "audio/wav",
];

/// Default upload size ceiling (100 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MediaPolicy {
    allowed: Vec<String>,
    max_bytes: u64,
}

impl MediaPolicy {
    pub fn new<I, S>(allowed: I, max_bytes: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .collect(),
            max_bytes,
        }
    }

    pub fn from_config(cfg: &PolicyConfig) -> Self {
        Self::new(&cfg.allowed_mime, cfg.max_upload_bytes)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn is_allowed(&self, mime: &str) -> bool {
        let mime = normalize(mime);
        self.allowed.iter().any(|m| *m == mime)
    }

    /// Admit or reject an upload of `len` bytes declared as `mime`.
    pub fn check(&self, mime: &str, len: usize) -> CustodyResult<()> {
        if !self.is_allowed(mime) {
            return Err(CustodyError::UnsupportedMediaType(mime.to_string()));
        }
        if len == 0 {
            return Err(CustodyError::InvalidRequest("file is empty".into()));
        }
        if len as u64 > self.max_bytes {
            return Err(CustodyError::InvalidRequest(format!(
                "file is {len} bytes, limit is {}",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_MIME, DEFAULT_MAX_UPLOAD_BYTES)
    }
}

/// Lowercase and drop parameters (`text/plain; charset=utf-8` → `text/plain`).
fn normalize(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allow_list() {
        let policy = MediaPolicy::default();
        assert!(policy.is_allowed("image/png"));
        assert!(policy.is_allowed("Application/PDF"));
        assert!(policy.is_allowed("audio/wav"));
        assert!(!policy.is_allowed("text/plain"));
        assert!(!policy.is_allowed("application/zip"));
    }

    #[test]
    fn mime_parameters_ignored() {
        let policy = MediaPolicy::default();
        assert!(policy.is_allowed("video/mp4; codecs=avc1"));
    }

    #[test]
    fn rejects_disallowed_type() {
        let err = MediaPolicy::default().check("text/html", 10).unwrap_err();
        assert!(matches!(err, CustodyError::UnsupportedMediaType(m) if m == "text/html"));
    }

    #[test]
    fn rejects_empty_and_oversized() {
        let policy = MediaPolicy::new(["image/png"], 8);
        assert!(matches!(
            policy.check("image/png", 0),
            Err(CustodyError::InvalidRequest(_))
        ));
        assert!(matches!(
            policy.check("image/png", 9),
            Err(CustodyError::InvalidRequest(_))
        ));
        assert!(policy.check("image/png", 8).is_ok());
    }
}

//! Error types for image generation.

use std::time::Duration;

/// Maximum length of a backend error body carried in an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Longest server-suggested wait honoured before a retry.
pub(crate) const MAX_RETRY_HINT: Duration = Duration::from_secs(120);

/// Errors that can occur while generating an image.
///
/// The first five variants form the failure taxonomy the orchestrator
/// reasons about; the rest are plumbing errors that the adapters fold
/// into it where they can.
#[derive(Debug, thiserror::Error)]
pub enum MingleError {
    /// API key missing, malformed, or rejected by the backend (401/403).
    #[error("credential error: {0}")]
    Credential(String),

    /// Payment required or rate limit exceeded (402/429).
    #[error("rate limit or quota exceeded: {status} - {message}")]
    RateLimitOrQuota { status: u16, message: String },

    /// Backend temporarily unavailable, e.g. a model still loading (503).
    #[error("transient backend error: {status} - {message}")]
    TransientBackend {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Backend broke its contract (missing task id, empty completed task).
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A task never reached a terminal state.
    #[error("task timed out after {attempts} polls ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    /// Backend reported the task as failed.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Any other non-success HTTP response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Payload was fetched but rejected (too small, not an image).
    #[error("rejected payload: {0}")]
    RejectedPayload(String),

    /// Failed to decode base64 or image data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// Raster encoding error.
    #[error("raster error: {0}")]
    Raster(#[from] image::ImageError),

    /// I/O error (e.g., saving a result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider unknown or not compiled in.
    #[error("provider not available: {0}")]
    ProviderNotAvailable(String),
}

impl MingleError {
    /// Classifies a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = sanitize_error_message(body);
        match status {
            401 | 403 => Self::Credential(format!("{} - {}", status, message)),
            402 | 429 => Self::RateLimitOrQuota { status, message },
            503 => Self::TransientBackend {
                status,
                retry_after: estimated_time(body),
                message,
            },
            _ => Self::Api { status, message },
        }
    }

    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientBackend { .. } | Self::Network(_))
    }

    /// Returns true for failures that must never be retried, at any layer.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Credential(_) | Self::RateLimitOrQuota { .. } | Self::MalformedResponse(_)
        )
    }

    /// Short explanation for people checking their setup.
    pub fn hint(&self) -> String {
        match self {
            Self::Credential(m) if m.starts_with("401") => "invalid API key".into(),
            Self::Credential(m) if m.starts_with("403") => "API key lacks permission".into(),
            Self::Credential(m) => m.clone(),
            Self::RateLimitOrQuota { status: 402, .. } => "payment or quota required".into(),
            Self::RateLimitOrQuota { .. } => "rate limit exceeded".into(),
            Self::TransientBackend { .. } => "backend temporarily unavailable".into(),
            Self::Api { status: 400, .. } => "request rejected (400)".into(),
            Self::Api { status: 404, .. } => "endpoint not found (404)".into(),
            Self::Api { status, .. } if *status >= 500 => format!("server error ({status})"),
            Self::Network(_) => "backend unreachable".into(),
            other => other.to_string(),
        }
    }

    /// Returns the server-suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientBackend { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Extracts the `estimated_time` hint (seconds) from a model-loading body,
/// capped at [`MAX_RETRY_HINT`].
fn estimated_time(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value.get("estimated_time")?.as_f64()?;
    if secs <= 0.0 {
        return None;
    }
    let hint = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_HINT);
    Some(hint.min(MAX_RETRY_HINT))
}

/// Truncates a backend error body and masks anything that looks like a key.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let masked: Vec<String> = text
        .split_whitespace()
        .map(|word| {
            let bare = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
            if looks_like_key(bare) {
                word.replace(bare, "[redacted]")
            } else {
                word.to_string()
            }
        })
        .collect();
    let joined = masked.join(" ");

    if joined.chars().count() > MAX_ERROR_BODY_CHARS {
        let cut: String = joined.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", cut)
    } else {
        joined
    }
}

fn looks_like_key(word: &str) -> bool {
    const PREFIXES: [&str; 2] = ["FPSX", "hf_"];
    word.len() >= 16 && PREFIXES.iter().any(|p| word.starts_with(p))
}

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, MingleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_taxonomy() {
        assert!(matches!(
            MingleError::from_status(401, "nope"),
            MingleError::Credential(_)
        ));
        assert!(matches!(
            MingleError::from_status(403, "nope"),
            MingleError::Credential(_)
        ));
        assert!(matches!(
            MingleError::from_status(402, "pay"),
            MingleError::RateLimitOrQuota { status: 402, .. }
        ));
        assert!(matches!(
            MingleError::from_status(429, "slow down"),
            MingleError::RateLimitOrQuota { status: 429, .. }
        ));
        assert!(matches!(
            MingleError::from_status(500, "boom"),
            MingleError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_model_loading_hint() {
        let err = MingleError::from_status(503, r#"{"error":"loading","estimated_time":12.5}"#);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs_f64(12.5)));

        let err = MingleError::from_status(503, "service unavailable");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_oversized_hint_is_capped() {
        for body in [
            r#"{"estimated_time":1e30}"#,
            r#"{"estimated_time":1.7976931348623157e308}"#,
            r#"{"estimated_time":86400}"#,
        ] {
            let err = MingleError::from_status(503, body);
            assert_eq!(err.retry_after(), Some(MAX_RETRY_HINT), "{body}");
        }
        let err = MingleError::from_status(503, r#"{"estimated_time":-4}"#);
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_is_retryable() {
        assert!(!MingleError::Credential("bad key".into()).is_retryable());
        assert!(!MingleError::RateLimitOrQuota {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(!MingleError::MalformedResponse("no task".into()).is_retryable());
        assert!(!MingleError::Timeout {
            attempts: 30,
            elapsed: Duration::from_secs(60)
        }
        .is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(MingleError::from_status(401, "").is_terminal());
        assert!(MingleError::from_status(429, "").is_terminal());
        assert!(!MingleError::from_status(503, "").is_terminal());
        assert!(!MingleError::from_status(500, "").is_terminal());
    }

    #[test]
    fn test_hints() {
        assert_eq!(MingleError::from_status(401, "").hint(), "invalid API key");
        assert_eq!(
            MingleError::from_status(403, "").hint(),
            "API key lacks permission"
        );
        assert_eq!(MingleError::from_status(429, "").hint(), "rate limit exceeded");
        assert_eq!(MingleError::from_status(402, "").hint(), "payment or quota required");
        assert_eq!(MingleError::from_status(400, "").hint(), "request rejected (400)");
        assert_eq!(MingleError::from_status(404, "").hint(), "endpoint not found (404)");
        assert_eq!(MingleError::from_status(500, "").hint(), "server error (500)");
        assert_eq!(
            MingleError::Credential("freepik API key not configured".into()).hint(),
            "freepik API key not configured"
        );
    }

    #[test]
    fn test_sanitize_masks_keys() {
        let text = "invalid key FPSXabcdefghijklmnopqrst supplied";
        let cleaned = sanitize_error_message(text);
        assert_eq!(cleaned, "invalid key [redacted] supplied");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(1000);
        let cleaned = sanitize_error_message(&long);
        assert!(cleaned.ends_with("..."));
        assert_eq!(cleaned.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }

    #[test]
    fn test_error_display() {
        let err = MingleError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 - Not found");

        let err = MingleError::Timeout {
            attempts: 30,
            elapsed: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "task timed out after 30 polls (60s)");
    }
}

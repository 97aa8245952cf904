use thiserror::Error;

/// Substrings the target API uses in error messages when a create hits an
/// already-existing resource. The API has no structured duplicate code, so
/// message sniffing is unavoidable; this module is the only place that does
/// it.
const DUPLICATE_MARKERS: &[&str] = &[
    "has already been taken",
    "already related",
    "already assigned",
    "member already exists",
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("'{description}' failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        description: String,
        attempts: u32,
        message: String,
    },
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }

    /// Transient failures worth another attempt: timeouts, connection
    /// trouble, rate limiting, server-side 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }

    /// A create that failed because the desired end-state already holds.
    pub fn is_duplicate(&self) -> bool {
        match self {
            ApiError::Status { message, .. } => is_duplicate_signal(message),
            _ => false,
        }
    }
}

pub fn is_duplicate_signal(message: &str) -> bool {
    let lower = message.to_lowercase();
    DUPLICATE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Turn a non-2xx response into `ApiError::Status`, carrying the body text
/// as the message (that's where the API puts its error details).
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

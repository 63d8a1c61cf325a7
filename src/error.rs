use thiserror::Error;

/// Failure of a call to the AI provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// The call did not finish within its deadline
    #[error("Request timed out")]
    Timeout,

    /// The request went out but nothing came back (connection refused, reset, ...)
    #[error("No response received: {0}")]
    NoResponse(String),

    /// The service answered with a non-2xx status
    #[error("Server error {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered 2xx but the body was unusable
    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if err.is_connect() || err.is_request() {
            AiError::NoResponse(err.to_string())
        } else if err.is_decode() {
            AiError::Malformed(err.to_string())
        } else {
            AiError::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Malformed(err.to_string())
    }
}

pub type AiResult<T> = Result<T, AiError>;

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    NoResponse,
}

/// User-facing classification of a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// Retryable within the upload retry budget
    Transient(TransientKind),
    Quota,
    RateLimited,
    ServerError { status: u16, body: String },
    Generic(String),
}

impl FailureCategory {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureCategory::Transient(_))
    }

    /// Final message shown in the transcript when an image upload ends in this category.
    pub fn upload_message(&self) -> String {
        const PREFIX: &str = "Error processing image: ";
        match self {
            FailureCategory::Quota => "The AI service has reached its request limit. Please try again later or use text queries instead.".to_string(),
            FailureCategory::RateLimited => "The AI service is currently busy. Please wait a few minutes before trying again.".to_string(),
            FailureCategory::ServerError { status, body } => {
                if body.trim().is_empty() {
                    format!("{}Server error: {}", PREFIX, status)
                } else {
                    format!("{}{}", PREFIX, body.trim())
                }
            }
            FailureCategory::Transient(TransientKind::NoResponse) => format!(
                "{}No response from server. Please check your connection or try with a smaller image.",
                PREFIX
            ),
            FailureCategory::Transient(TransientKind::Timeout) => format!(
                "{}The request took too long to process. Please try with a smaller or clearer image.",
                PREFIX
            ),
            FailureCategory::Generic(message) => format!("{}{}", PREFIX, message),
        }
    }
}

/// Classifies a provider failure. Checks run in order: quota text, rate-limit text,
/// non-2xx status, no response at all, then anything else.
pub fn classify(err: &AiError) -> FailureCategory {
    if let AiError::Status { status, body } = err {
        let lower = body.to_lowercase();
        if lower.contains("quota") {
            return FailureCategory::Quota;
        }
        if *status == 429 || lower.contains("429 too many requests") || lower.contains("rate limit") {
            return FailureCategory::RateLimited;
        }
        return FailureCategory::ServerError {
            status: *status,
            body: body.clone(),
        };
    }
    match err {
        AiError::Timeout => FailureCategory::Transient(TransientKind::Timeout),
        AiError::NoResponse(_) => FailureCategory::Transient(TransientKind::NoResponse),
        other => FailureCategory::Generic(other.to_string()),
    }
}

/// Rejections from image preparation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Image is too large ({size} bytes, limit {limit}). Please use a smaller image.")]
    TooLarge { size: usize, limit: usize },

    #[error("Image data is empty")]
    Empty,

    #[error("Image data could not be decoded: {0}")]
    Decode(String),
}

use thiserror::Error;

/// A failed resource fetch.
///
/// Recorded on the cache entry that requested it and surfaced to bindings as
/// data; the synchronization layer never retries and never throws these into
/// the consumer. A fetch that fails leaves the entry stale-with-error until
/// a later revalidation succeeds.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unauthorized - session may be expired")]
    Unauthorized,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed payload: {0}")]
    Decode(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 | 403 => FetchError::Unauthorized,
            404 => FetchError::NotFound(truncated),
            500..=599 => FetchError::ServerError(truncated),
            code => FetchError::Status {
                status: code,
                body: truncated,
            },
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Name of the remote endpoint an error came from, e.g. `"upload"`.
pub type Endpoint = &'static str;

/// Errors raised while talking to the steganography service
#[derive(Debug, Error)]
pub enum StegError {
    #[error("{endpoint}: request failed")]
    Http {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: server answered {status}: {message}")]
    Status {
        endpoint: Endpoint,
        status: StatusCode,
        message: String,
    },

    #[error("{endpoint}: malformed response")]
    Malformed {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },

    #[error("{endpoint}: response is missing `{field}`")]
    MissingField {
        endpoint: Endpoint,
        field: &'static str,
    },

    #[error("API key is not a valid header value")]
    InvalidApiKey,

    #[error("Failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request {request_id} failed remotely with status {status:?}")]
    RequestFailed { request_id: String, status: String },

    #[error("Request {request_id} not completed after {attempts} status checks")]
    AttemptsExhausted { request_id: String, attempts: u32 },

    #[error("Request {request_id} not completed within {elapsed:?} ({attempts} status checks)")]
    DeadlineExceeded {
        request_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Polling of request {request_id} cancelled after {attempts} status checks")]
    Cancelled { request_id: String, attempts: u32 },

    #[error("{kind} of media {media_id} cancelled before submission")]
    CancelledBeforeSubmit {
        kind: &'static str,
        media_id: String,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StegError {
    pub(crate) fn http(endpoint: Endpoint) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| StegError::Http { endpoint, source }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StegError::Io { path, source }
    }

    /// Whether the error ends polling because of what the remote reported
    /// rather than a local limit or transport problem.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, StegError::RequestFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StegError::Cancelled { .. } | StegError::CancelledBeforeSubmit { .. }
        )
    }
}

pub type Result<T, E = StegError> = std::result::Result<T, E>;

use std::time::Duration;

/// Fatal errors. Any of these aborts the whole scrape run; no partial
/// snapshot is produced.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction error at {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Fetch cancelled: {0}")]
    Cancelled(String),

    #[error("Scrape deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScrapeError {
    pub fn extraction(url: impl Into<String>, message: impl Into<String>) -> Self {
        ScrapeError::Extraction {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Retryable fetch failures. Contained inside the fetcher's retry loop.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("empty document")]
    EmptyDocument,
}

/// Why a raw ranking row was dropped. Never propagated; rows are skipped
/// and the reason logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("position '{0}' is not a positive integer")]
    BadPosition(String),

    #[error("time '{0}' could not be decoded")]
    BadTime(String),

    #[error("points '{0}' could not be decoded")]
    BadPoints(String),

    #[error("result is missing")]
    MissingResult,

    #[error("same-time marker without a preceding time")]
    NoPreviousTime,

    #[error("time {time}s is lower than preceding {previous}s")]
    TimeRegression { time: u64, previous: u64 },

    #[error("participant '{0}' could not be resolved")]
    UnresolvedParticipant(String),
}

/// Errors reading operational parameters from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

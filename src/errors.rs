//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Schema or constraint violation from a caller.
    InputInvalid(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Uniqueness or precondition failure.
    Conflict(String),
    /// Plan limit reached for the given resource.
    QuotaExceeded {
        /// Resource kind that hit its limit (`session` or `pair`).
        resource: String,
        /// Current counter value.
        current: u32,
        /// Plan maximum for the resource.
        max: u32,
    },
    /// Rate limit exhausted for the calling user.
    Throttled {
        /// Seconds until the bucket refills enough to admit the call.
        retry_after_s: u64,
    },
    /// No candidate worker exists and queue admission is not allowed.
    WorkerUnavailable(String),
    /// Retryable chat-platform or worker failure.
    PlatformTransient(String),
    /// Non-retryable chat-platform or worker failure.
    PlatformPermanent(String),
    /// Transient store contention; retried locally with bounded backoff.
    StoreBusy(String),
    /// Anything unexpected. Logged with context, never surfaced verbatim.
    Internal(String),
}

impl AppError {
    /// Whether the error denotes a transient condition worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PlatformTransient(_) | Self::StoreBusy(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::InputInvalid(msg) => write!(f, "input invalid: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::QuotaExceeded {
                resource,
                current,
                max,
            } => write!(f, "quota exceeded: {resource} ({current}/{max})"),
            Self::Throttled { retry_after_s } => {
                write!(f, "throttled: retry after {retry_after_s}s")
            }
            Self::WorkerUnavailable(msg) => write!(f, "worker unavailable: {msg}"),
            Self::PlatformTransient(msg) => write!(f, "platform transient: {msg}"),
            Self::PlatformPermanent(msg) => write!(f, "platform permanent: {msg}"),
            Self::StoreBusy(msg) => write!(f, "store busy: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    Self::Conflict(db_err.to_string())
                } else if db_err.code().is_some_and(|c| c == "5" || c == "6") {
                    // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
                    Self::StoreBusy(db_err.to_string())
                } else {
                    Self::Db(err.to_string())
                }
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            _ => Self::Db(err.to_string()),
        }
    }
}

/// Core error type for the gateway.
///
/// Adapter crates map these into their own response signals via [`Error::kind`],
/// so the web layer and the bot can react differently to each outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Unknown, exhausted, or disabled code. The cause is never exposed.
    #[error("invalid access code")]
    InvalidCode,

    #[error("session not found")]
    SessionNotFound,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("external error: {0}")]
    External(String),
}

/// Stable, caller-visible classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCode,
    SessionNotFound,
    RateLimited,
    Storage,
    InvalidInput,
    Config,
    External,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidCode => "invalid_code",
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Storage => "storage_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Config => "config_error",
            ErrorKind::External => "external_error",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidCode => ErrorKind::InvalidCode,
            Error::SessionNotFound => ErrorKind::SessionNotFound,
            Error::RateLimited => ErrorKind::RateLimited,
            Error::Storage(_) | Error::Io(_) | Error::Json(_) | Error::Database(_) => {
                ErrorKind::Storage
            }
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::External(_) => ErrorKind::External,
        }
    }

    /// Expected, user-visible outcomes (as opposed to failures of the operation).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidCode | ErrorKind::SessionNotFound | ErrorKind::RateLimited
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_json_failures_classify_as_storage() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind(), ErrorKind::Storage);

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(Error::Json(json).kind().as_str(), "storage_error");

        let db = Error::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(db.kind(), ErrorKind::Storage);
    }

    #[test]
    fn rejections_are_distinct_from_failures() {
        assert!(Error::InvalidCode.is_rejection());
        assert!(Error::RateLimited.is_rejection());
        assert!(Error::SessionNotFound.is_rejection());
        assert!(!Error::Storage("x".to_string()).is_rejection());
        assert_ne!(
            Error::SessionNotFound.kind().as_str(),
            Error::RateLimited.kind().as_str()
        );
    }
}

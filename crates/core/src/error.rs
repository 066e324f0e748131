use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level failure. Recovered by the connection supervisor,
    /// never surfaced to a waiting caller.
    #[error("Connection fault: {0}")]
    ConnectionFault(String),

    #[error("Bot reported error: {0}")]
    BotReported(String),

    #[error("Duplicate images detected: {0}")]
    DuplicateArtifact(String),

    /// The human-verification flow cannot run; names the missing piece.
    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(&'static str),

    #[error("Verification classifier returned no label")]
    VerificationInconclusive,

    #[error("Continuation dispatch rejected with status {0}")]
    ContinuationRejected(u16),

    #[error("No pending request matches: {0}")]
    CorrelationNotFound(String),

    #[error("Task timed out: {0}")]
    TaskTimeout(String),

    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<Error> },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Gateway closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_display_includes_last_error() {
        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::ContinuationRejected(400)),
        };
        assert_eq!(
            err.to_string(),
            "Failed after 3 attempts: Continuation dispatch rejected with status 400"
        );
    }
}

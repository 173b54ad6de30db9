use thiserror::Error;

/// Boundary errors surface synchronously to the caller; degradation errors
/// (`PermissionDenied`, `ContextUnavailable`) downgrade functionality with a
/// stderr warning instead of aborting.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("invalid reminder: {0}")]
    Validation(String),

    #[error("unparseable time '{0}', expected H, HH, H:M, HH:MM or HH:MM:SS")]
    Format(String),

    #[error("no reminder with id '{0}'")]
    NotFound(String),

    #[error("countdown duration must be greater than zero, got {0}")]
    InvalidDuration(u64),

    #[error("notification permission denied")]
    PermissionDenied,

    #[error("execution context unavailable: {0}")]
    ContextUnavailable(String),
}

pub type TimerResult<T> = Result<T, TimerError>;

use std::fmt;

use thiserror::Error;

/// Error returned by every blocking ctxsync operation.
///
/// The kind is boxed to keep `Result<T>` small on the success path. `Error` is
/// `Clone`, so a single cancellation cause can be handed out to any number of
/// waiters.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn already_consumed() -> Error {
        ErrorKind::AlreadyConsumed.into()
    }

    pub fn receiver_closed() -> Error {
        ErrorKind::ReceiverClosed.into()
    }

    pub fn already_shutdown() -> Error {
        ErrorKind::AlreadyShutdown.into()
    }

    pub fn no_idle_worker() -> Error {
        ErrorKind::NoIdleWorker.into()
    }

    pub fn cancelled(cause: CancelCause) -> Error {
        ErrorKind::Cancelled(cause).into()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled(_))
    }

    pub fn is_already_consumed(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyConsumed)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyShutdown)
    }

    /// Returns the cancellation cause when this error came from a fired context.
    pub fn cancel_cause(&self) -> Option<&CancelCause> {
        match self.kind() {
            ErrorKind::Cancelled(cause) => Some(cause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    #[error("job has already been consumed")]
    AlreadyConsumed,

    #[error("job receiver channel has been closed")]
    ReceiverClosed,

    #[error("worker has already been shut down")]
    AlreadyShutdown,

    #[error("no idle worker is available")]
    NoIdleWorker,

    #[error("operation cancelled: {0}")]
    Cancelled(CancelCause),

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

/// Why a context was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// Cancelled explicitly, without a custom cause.
    Canceled,
    /// The context deadline passed.
    DeadlineExceeded,
    /// Cancelled explicitly with a caller supplied cause.
    Custom(String),
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Canceled => f.write_str("context canceled"),
            CancelCause::DeadlineExceeded => f.write_str("context deadline exceeded"),
            CancelCause::Custom(cause) => f.write_str(cause),
        }
    }
}

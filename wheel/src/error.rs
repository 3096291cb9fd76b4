use std::fmt;

/// Errors returned by the public API of this crate.
#[derive(Debug)]
pub enum Error {
    /// A constructor or `submit` argument was out of range.
    InvalidArgument {
        /// Human readable explanation of which argument and why.
        reason: &'static str,
    },
    /// `submit` was called after [`WheelController::shutdown`](crate::WheelController::shutdown).
    ShutDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Error::ShutDown => write!(f, "wheel controller is shut down"),
        }
    }
}

impl std::error::Error for Error {}

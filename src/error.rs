//! Error taxonomy for selector operations.

use std::error;
use std::fmt;
use std::io;

use crate::event::Ops;

/// A specialized `Result` type for selector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by [`Selector`] and [`Key`] operations.
///
/// Nothing is retried internally; retry and backoff policy is left to the
/// caller. A wakeup that interrupts a blocking selection is not an error.
///
/// [`Selector`]: ../struct.Selector.html
/// [`Key`]: ../struct.Key.html
#[derive(Debug)]
pub enum Error {
    /// The selector has been closed.
    ///
    /// Every operation other than `wakeup` and `close` fails with this once
    /// the selector is closed, including a selection call whose action closed
    /// the selector mid-consumption.
    Closed,

    /// The registration key has been cancelled.
    Cancelled,

    /// The requested interest set is not supported by the endpoint.
    ///
    /// Reported synchronously, before any state is mutated.
    InvalidInterest {
        /// The interest the caller asked for.
        requested: Ops,
        /// The operations the endpoint supports.
        valid: Ops,
    },

    /// The readiness provider failed.
    ///
    /// Cancellations already purged before the failure stay purged; partial
    /// progress is not rolled back.
    Io(io::Error),

    /// A caller-supplied selection action failed.
    ///
    /// The original error is relayed unmodified. Keys consumed before the
    /// failure remain consumed; the rest stay in the selected set.
    Action(anyhow::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Closed => write!(fmt, "selector is closed"),
            Error::Cancelled => write!(fmt, "registration key is cancelled"),
            Error::InvalidInterest { requested, valid } => write!(
                fmt,
                "interest {:?} is outside the endpoint's valid operations {:?}",
                requested, valid
            ),
            Error::Io(err) => write!(fmt, "readiness provider failed: {}", err),
            Error::Action(err) => write!(fmt, "selection action failed: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Action(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

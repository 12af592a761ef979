//! The injected readiness provider contract.
//!
//! A [`Selector`] never talks to the operating system itself. Each selection
//! cycle snapshots its registrations and hands them to a [`Poller`], which
//! answers with the endpoints that are ready. Anything can sit behind the
//! trait: an OS readiness queue, a simulation, or the in-process
//! [`SignalPoller`] shipped with this crate.
//!
//! [`Selector`]: ../struct.Selector.html
//! [`Poller`]: trait.Poller.html
//! [`SignalPoller`]: signal/struct.SignalPoller.html

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::event::{Event, Ops};
use crate::token::Token;

pub mod signal;

/// How long one poll is allowed to block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Return after a single readiness query, without blocking.
    Immediate,
    /// Block until readiness, a wake, or the duration elapses. Best effort,
    /// not real time.
    Timeout(Duration),
    /// Block until readiness or a wake.
    Infinite,
}

/// One registration handed to a poll: the token to report back, the interest
/// snapshot taken at cycle start, and the endpoint itself.
///
/// Entries are sorted by token and only contain registrations whose interest
/// set was non-empty when the cycle began.
pub struct PollEntry {
    token: Token,
    interest: Ops,
    endpoint: Arc<dyn Endpoint>,
}

impl PollEntry {
    pub(crate) fn new(token: Token, interest: Ops, endpoint: Arc<dyn Endpoint>) -> PollEntry {
        PollEntry {
            token,
            interest,
            endpoint,
        }
    }

    /// The token identifying the registration.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The interest snapshot for this poll.
    pub fn interest(&self) -> Ops {
        self.interest
    }

    /// The registered endpoint.
    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }
}

impl fmt::Debug for PollEntry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PollEntry")
            .field("token", &self.token)
            .field("interest", &self.interest)
            .finish()
    }
}

/// A readiness backend injected into a [`Selector`].
///
/// Implementations must be usable from multiple threads: `poll` runs on
/// whichever thread drives the selection cycle while `wake` may arrive from
/// any other thread at any moment.
///
/// [`Selector`]: ../struct.Selector.html
pub trait Poller: Send + Sync {
    /// Queries readiness once for every entry, blocking per `deadline`.
    ///
    /// Returns the entries observed ready, as `(token, ops)` events. An empty
    /// vector means the deadline elapsed or a wake arrived. Reported
    /// operations outside an entry's interest are ignored by the caller.
    ///
    /// A pending wake must be consumed by the poll that observes it, so that
    /// any number of wakes between two polls collapse into a single early
    /// return.
    fn poll(&self, entries: &[PollEntry], deadline: Deadline) -> io::Result<Vec<Event>>;

    /// Makes the current (or next) `poll` return immediately.
    fn wake(&self) -> io::Result<()>;

    /// Releases provider resources. Invoked once, by selector close.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

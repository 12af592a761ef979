//! In-process readiness driven by the application.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::endpoint::Endpoint;
use crate::event::{Event, Ops};
use crate::poller::{Deadline, PollEntry, Poller};

/// A [`Poller`] whose readiness lives entirely in user space.
///
/// Endpoints are created in pairs through [`readiness`]: a [`SignalEndpoint`]
/// to register with a selector, and a [`SetReadiness`] handle to flip its
/// readiness from any thread. Setting readiness signals a blocked poll, so a
/// blocking selection wakes as soon as an endpoint becomes ready.
///
/// Cloning a `SignalPoller` yields another handle to the same poller; keep a
/// clone around to mint endpoints after handing the poller to a selector.
///
/// # Examples
///
/// ```
/// use muxio::{Ops, Selector, SignalPoller};
///
/// # fn main() -> muxio::Result<()> {
/// let poller = SignalPoller::new();
/// let (endpoint, readiness) = poller.readiness();
/// let selector = Selector::new(poller.clone());
///
/// selector.register(endpoint, Ops::readable())?;
/// readiness.set_readiness(Ops::readable());
///
/// assert_eq!(selector.select_now()?, 1);
/// # Ok(())
/// # }
/// ```
///
/// [`Poller`]: trait.Poller.html
/// [`readiness`]: #method.readiness
/// [`SignalEndpoint`]: struct.SignalEndpoint.html
/// [`SetReadiness`]: struct.SetReadiness.html
#[derive(Clone)]
pub struct SignalPoller {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    woken: bool,
    // Bumped on every readiness change so a poll that queried before the
    // change re-queries instead of parking.
    generation: u64,
}

impl SignalPoller {
    /// Creates a new poller with no pending wake.
    pub fn new() -> SignalPoller {
        SignalPoller {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    woken: false,
                    generation: 0,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Creates an endpoint driven by this poller, plus the handle that sets
    /// its readiness.
    pub fn readiness(&self) -> (Arc<SignalEndpoint>, SetReadiness) {
        let endpoint = Arc::new(SignalEndpoint {
            ready: AtomicUsize::new(0),
            shared: self.shared.clone(),
        });
        let set = SetReadiness {
            endpoint: endpoint.clone(),
        };
        (endpoint, set)
    }
}

impl Default for SignalPoller {
    fn default() -> SignalPoller {
        SignalPoller::new()
    }
}

impl fmt::Debug for SignalPoller {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        fmt.debug_struct("SignalPoller")
            .field("woken", &state.woken)
            .finish()
    }
}

impl Poller for SignalPoller {
    fn poll(&self, entries: &[PollEntry], deadline: Deadline) -> io::Result<Vec<Event>> {
        let wait_until = match deadline {
            Deadline::Timeout(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };

        loop {
            // Snapshot the generation before querying, so a readiness change
            // racing with the query forces a re-query instead of a park.
            let generation = self.shared.state.lock().generation;

            let mut events = Vec::new();
            for entry in entries {
                let ready = entry.endpoint().query_ready(entry.interest()) & entry.interest();
                if !ready.is_empty() {
                    events.push(Event::new(ready, entry.token()));
                }
            }

            let mut state = self.shared.state.lock();
            if !events.is_empty() || deadline == Deadline::Immediate {
                // Any completed poll consumes a pending wake.
                state.woken = false;
                return Ok(events);
            }
            if state.woken {
                state.woken = false;
                return Ok(events);
            }
            if state.generation != generation {
                continue;
            }

            match wait_until {
                Some(until) => {
                    if self.shared.cond.wait_until(&mut state, until).timed_out() {
                        state.woken = false;
                        return Ok(events);
                    }
                }
                None => self.shared.cond.wait(&mut state),
            }
        }
    }

    fn wake(&self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.woken = true;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        // Release any straggler still parked in poll.
        self.wake()
    }
}

/// A user-space [`Endpoint`] whose readiness is set by the application.
///
/// Created through [`SignalPoller::readiness`].
///
/// [`Endpoint`]: ../trait.Endpoint.html
/// [`SignalPoller::readiness`]: struct.SignalPoller.html#method.readiness
pub struct SignalEndpoint {
    ready: AtomicUsize,
    shared: Arc<Shared>,
}

impl Endpoint for SignalEndpoint {
    fn query_ready(&self, interest: Ops) -> Ops {
        Ops::from_usize(self.ready.load(Ordering::Acquire)) & interest
    }
}

impl fmt::Debug for SignalEndpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SignalEndpoint")
            .field("ready", &Ops::from_usize(self.ready.load(Ordering::Acquire)))
            .finish()
    }
}

/// Sets the readiness of a [`SignalEndpoint`] from any thread.
///
/// [`SignalEndpoint`]: struct.SignalEndpoint.html
#[derive(Clone)]
pub struct SetReadiness {
    endpoint: Arc<SignalEndpoint>,
}

impl SetReadiness {
    /// Replaces the endpoint's readiness with exactly `ops` and signals any
    /// blocked poll.
    pub fn set_readiness(&self, ops: Ops) {
        self.endpoint.ready.store(ops.as_usize(), Ordering::Release);
        let mut state = self.endpoint.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.endpoint.shared.cond.notify_all();
    }

    /// Returns the endpoint's current readiness.
    pub fn readiness(&self) -> Ops {
        Ops::from_usize(self.endpoint.ready.load(Ordering::Acquire))
    }
}

impl fmt::Debug for SetReadiness {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SetReadiness")
            .field("readiness", &self.readiness())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn entry(poller: &SignalPoller, interest: Ops) -> (PollEntry, SetReadiness) {
        let (endpoint, set) = poller.readiness();
        let entry = PollEntry::new(crate::Token(0), interest, endpoint);
        (entry, set)
    }

    #[test]
    fn immediate_poll_reports_current_readiness() {
        let poller = SignalPoller::new();
        let (entry, set) = entry(&poller, Ops::readable());
        let entries = vec![entry];

        let events = poller.poll(&entries, Deadline::Immediate).unwrap();
        assert!(events.is_empty());

        set.set_readiness(Ops::readable());
        let events = poller.poll(&entries, Deadline::Immediate).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].readiness(), Ops::readable());
    }

    #[test]
    fn readiness_outside_interest_is_masked() {
        let poller = SignalPoller::new();
        let (entry, set) = entry(&poller, Ops::readable());

        set.set_readiness(Ops::writable());
        let events = poller.poll(&[entry], Deadline::Immediate).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn wake_is_consumed_once() {
        let poller = SignalPoller::new();
        poller.wake().unwrap();
        poller.wake().unwrap();

        let events = poller.poll(&[], Deadline::Infinite).unwrap();
        assert!(events.is_empty());

        let start = Instant::now();
        let events = poller
            .poll(&[], Deadline::Timeout(Duration::from_millis(50)))
            .unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn set_readiness_wakes_blocked_poll() {
        let poller = SignalPoller::new();
        let (entry, set) = entry(&poller, Ops::writable());

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            set.set_readiness(Ops::writable());
        });

        let events = poller.poll(&[entry], Deadline::Infinite).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readiness().is_writable());
        handle.join().unwrap();
    }
}

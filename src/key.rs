//! Registration keys.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::Ops;
use crate::selector::Shared;
use crate::token::Token;

/// A registration of an [`Endpoint`] with a [`Selector`].
///
/// A `Key` binds one endpoint to one selector. It carries the *interest set*
/// (operations its owner wants reported, mutable through [`set_interest`])
/// and the *ready set* (operations last observed ready, written by selection
/// cycles).
///
/// A key is valid until it is cancelled, its selector is closed, or its
/// selector is dropped. Cancelling never removes the key synchronously; the
/// key stays in the selector's key set until the next selection cycle purges
/// it and deregisters the endpoint.
///
/// `Key` is a cheap-to-clone handle; clones refer to the same registration.
/// The key holds no ownership of its selector, so dropping keys and dropping
/// the selector can happen in either order.
///
/// [`Endpoint`]: trait.Endpoint.html
/// [`Selector`]: struct.Selector.html
/// [`set_interest`]: #method.set_interest
#[derive(Clone)]
pub struct Key {
    inner: Arc<Inner>,
}

struct Inner {
    token: Token,
    endpoint: Arc<dyn Endpoint>,
    selector: Weak<Shared>,
    interest: AtomicUsize,
    ready: AtomicUsize,
    cancelled: AtomicBool,
}

impl Key {
    pub(crate) fn new(
        token: Token,
        endpoint: Arc<dyn Endpoint>,
        selector: Weak<Shared>,
        interest: Ops,
    ) -> Key {
        Key {
            inner: Arc::new(Inner {
                token,
                endpoint,
                selector,
                interest: AtomicUsize::new(interest.as_usize()),
                ready: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the token identifying this registration.
    pub fn token(&self) -> Token {
        self.inner.token
    }

    /// Returns the registered endpoint.
    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.inner.endpoint
    }

    /// Returns the current interest set.
    pub fn interest(&self) -> Ops {
        Ops::from_usize(self.inner.interest.load(Ordering::Acquire))
    }

    /// Replaces the interest set.
    ///
    /// The change is observed starting with the *next* selection cycle; a
    /// cycle already in progress keeps the interest snapshot it took at its
    /// start.
    ///
    /// Fails with [`Error::Cancelled`] or [`Error::Closed`] if the key is no
    /// longer valid, and with [`Error::InvalidInterest`] if `interest` is not
    /// a subset of the endpoint's [`valid_ops`]. Failures mutate nothing.
    ///
    /// [`Error::Cancelled`]: error/enum.Error.html#variant.Cancelled
    /// [`Error::Closed`]: error/enum.Error.html#variant.Closed
    /// [`Error::InvalidInterest`]: error/enum.Error.html#variant.InvalidInterest
    /// [`valid_ops`]: trait.Endpoint.html#method.valid_ops
    pub fn set_interest(&self, interest: Ops) -> Result<()> {
        let selector = self.inner.selector.upgrade().ok_or(Error::Closed)?;
        if !selector.is_open() {
            return Err(Error::Closed);
        }
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        let valid = self.inner.endpoint.valid_ops();
        if !valid.contains(interest) {
            return Err(Error::InvalidInterest {
                requested: interest,
                valid,
            });
        }
        self.inner.interest.store(interest.as_usize(), Ordering::Release);
        Ok(())
    }

    /// Returns the operations last observed ready for this key.
    ///
    /// Empty if the key has never been selected. The value is written by
    /// selection cycles and is only meaningful while the key is valid.
    pub fn ready(&self) -> Ops {
        Ops::from_usize(self.inner.ready.load(Ordering::Acquire))
    }

    /// Requests cancellation of this registration.
    ///
    /// Idempotent and callable from any thread at any time, including from
    /// inside a selection action. The key is only queued for removal here; it
    /// remains in the selector's key set (and possibly its selected set)
    /// until the next selection cycle purges it.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(selector) = self.inner.selector.upgrade() {
            selector.enqueue_cancelled(self.clone());
        }
    }

    /// Tells whether this key is valid.
    ///
    /// A key is valid iff it has not been cancelled and its selector is open.
    /// There is no ordering guarantee against concurrent cancellation: a
    /// caller observing `true` must tolerate the key turning invalid
    /// asynchronously.
    pub fn is_valid(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.selector.upgrade() {
            Some(selector) => selector.is_open(),
            None => false,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Marks the key cancelled without queueing it, used by close teardown.
    pub(crate) fn invalidate(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn store_interest(&self, interest: Ops) {
        self.inner.interest.store(interest.as_usize(), Ordering::Release);
    }

    /// Overwrites the ready set with exactly `ops`, discarding stale bits.
    pub(crate) fn set_ready(&self, ops: Ops) {
        self.inner.ready.store(ops.as_usize(), Ordering::Release);
    }

    /// Unions `ops` into the ready set, returning the previous value.
    pub(crate) fn union_ready(&self, ops: Ops) -> Ops {
        Ops::from_usize(self.inner.ready.fetch_or(ops.as_usize(), Ordering::AcqRel))
    }

    pub(crate) fn is_same_endpoint(&self, endpoint: &Arc<dyn Endpoint>) -> bool {
        Arc::ptr_eq(&self.inner.endpoint, endpoint)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Key")
            .field("token", &self.token())
            .field("interest", &self.interest())
            .field("ready", &self.ready())
            .field("valid", &self.is_valid())
            .finish()
    }
}

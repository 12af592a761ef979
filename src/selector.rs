//! The multiplexor.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use slab::Slab;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::Ops;
use crate::key::Key;
use crate::poller::{Deadline, PollEntry, Poller};
use crate::selected::{SelectedKeys, SelectedSet};
use crate::token::Token;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Multiplexes readiness over many registered endpoints.
///
/// A `Selector` lets any number of threads register [`Endpoint`]s, block until
/// at least one is ready, and retrieve exactly which endpoints and operations
/// are ready, without polling each endpoint individually. The OS-level
/// readiness backend is an injected [`Poller`]; the selector owns only the
/// bookkeeping protocol.
///
/// # Selection
///
/// Every selection operation runs one *cycle* of three steps:
///
/// 1. **Purge.** Every key cancelled since the previous cycle is removed from
///    the key set and the selected set, and its endpoint is deregistered.
/// 2. **Poll.** The poller is queried once with a snapshot of every valid
///    key's interest, taken as of the moment the cycle began. For each key
///    reported ready: if it is not in the selected set it is inserted with
///    its ready set equal to exactly the reported operations (stale bits are
///    discarded); otherwise the reported operations are unioned into its
///    ready set, so unconsumed readiness is never lost. Keys whose interest
///    snapshot is empty are skipped entirely.
/// 3. **Re-purge.** Keys cancelled while the poll was in flight are processed
///    as in step 1.
///
/// The three entry-point shapes differ only in blocking behavior:
/// [`select_now`] returns instantly, [`select_timeout`] blocks up to a
/// duration, [`select`] blocks until readiness or a wakeup. Each has an
/// action-consuming variant that empties the selected set and hands every
/// newly selected key to a caller-supplied closure instead.
///
/// # Concurrency
///
/// The selector and its key set are safe for concurrent use. Selection
/// cycles serialize on an internal cycle gate (a second caller waits, it is
/// not rejected) and acquire the selected set, then the cancelled set, in a
/// fixed order; [`close`] synchronizes the same way. Interest changes made
/// while a cycle is in flight are observed by the next cycle, never the
/// current one. Cancellation is legal at any time from any thread and is
/// deferred to the next purge step.
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
/// let key = selector.register(endpoint, Ops::readable())?;
/// readiness.set_readiness(Ops::readable());
///
/// assert_eq!(selector.select_now()?, 1);
/// {
///     let mut selected = selector.selected_keys()?;
///     assert!(selected.contains(&key));
///     assert!(key.ready().is_readable());
///     selected.clear();
/// }
///
/// key.cancel();
/// selector.select_now()?;
/// assert!(selector.keys()?.is_empty());
///
/// selector.close()?;
/// # Ok(())
/// # }
/// ```
///
/// [`Endpoint`]: trait.Endpoint.html
/// [`Poller`]: poller/trait.Poller.html
/// [`select_now`]: #method.select_now
/// [`select_timeout`]: #method.select_timeout
/// [`select`]: #method.select
/// [`close`]: #method.close
pub struct Selector {
    shared: Arc<Shared>,
}

/// State shared between the selector handle and its keys.
///
/// Lock order, outermost first: `cycle`, `selected`, `cancelled`, `keys`.
/// Every path that takes more than one of these takes them in this order.
pub(crate) struct Shared {
    id: usize,
    poller: Box<dyn Poller>,
    open: AtomicBool,
    /// Serializes selection cycles. Reentrant so an action may call back
    /// into `close` on the selecting thread.
    cycle: ReentrantMutex<()>,
    /// The key set: every live registration, indexed by token.
    keys: RwLock<Slab<Key>>,
    /// The selected set: keys touched by the most recent cycles.
    selected: Mutex<SelectedSet>,
    /// Keys cancelled but not yet purged. Subset of `keys` at all times.
    cancelled: Mutex<Vec<Key>>,
}

/// The action shape consumed by the `*_with` selection variants.
type Action<'a> = &'a mut dyn FnMut(&Key) -> anyhow::Result<()>;

impl Selector {
    /// Creates a selector draining readiness from `poller`.
    pub fn new<P>(poller: P) -> Selector
    where
        P: Poller + 'static,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!("selector {}: open", id);
        Selector {
            shared: Arc::new(Shared {
                id,
                poller: Box::new(poller),
                open: AtomicBool::new(true),
                cycle: ReentrantMutex::new(()),
                keys: RwLock::new(Slab::new()),
                selected: Mutex::new(SelectedSet::new()),
                cancelled: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Tells whether this selector is open.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Registers `endpoint` and returns its key.
    ///
    /// The key starts with an empty ready set and enters the key set
    /// immediately; it is observed by the next selection cycle. Registering
    /// an endpoint that already has a valid key updates that key's interest
    /// and returns it, so membership stays unique per endpoint.
    ///
    /// Fails with [`Error::InvalidInterest`] if `interest` is not a subset of
    /// the endpoint's [`valid_ops`], and with [`Error::Closed`] if the
    /// selector is closed. Failures register nothing.
    ///
    /// [`Error::InvalidInterest`]: error/enum.Error.html#variant.InvalidInterest
    /// [`Error::Closed`]: error/enum.Error.html#variant.Closed
    /// [`valid_ops`]: trait.Endpoint.html#method.valid_ops
    pub fn register(&self, endpoint: Arc<dyn Endpoint>, interest: Ops) -> Result<Key> {
        let valid = endpoint.valid_ops();
        if !valid.contains(interest) {
            return Err(Error::InvalidInterest {
                requested: interest,
                valid,
            });
        }

        let mut keys = self.shared.keys.write();
        // Checked under the write lock so close cannot slip between the
        // check and the insert.
        if !self.shared.is_open() {
            return Err(Error::Closed);
        }

        for (_, key) in keys.iter() {
            if key.is_same_endpoint(&endpoint) && !key.is_cancelled() {
                key.store_interest(interest);
                trace!(
                    "selector {}: re-register {:?} interest={:?}",
                    self.shared.id,
                    key.token(),
                    interest
                );
                return Ok(key.clone());
            }
        }

        let entry = keys.vacant_entry();
        let token = Token(entry.key());
        let key = Key::new(token, endpoint, Arc::downgrade(&self.shared), interest);
        entry.insert(key.clone());
        debug!(
            "selector {}: register {:?} interest={:?}",
            self.shared.id, token, interest
        );
        Ok(key)
    }

    /// Returns a snapshot of the key set.
    ///
    /// The snapshot is consistent with one point in time; registrations and
    /// purges racing with this call are either fully visible or fully
    /// absent. Cancelled-but-not-yet-purged keys are included.
    pub fn keys(&self) -> Result<Vec<Key>> {
        if !self.shared.is_open() {
            return Err(Error::Closed);
        }
        let keys = self.shared.keys.read();
        Ok(keys.iter().map(|(_, key)| key.clone()).collect())
    }

    /// Locks and returns the selected-key set.
    ///
    /// Keys may be removed from, but not added to, the returned view. Drop
    /// the view before calling a selection operation from the same thread.
    pub fn selected_keys(&self) -> Result<SelectedKeys<'_>> {
        if !self.shared.is_open() {
            return Err(Error::Closed);
        }
        Ok(SelectedKeys::new(self.shared.selected.lock()))
    }

    /// Runs one non-blocking selection cycle.
    ///
    /// Returns the number of keys whose ready set was updated, possibly
    /// zero. Consumes any pending wakeup.
    pub fn select_now(&self) -> Result<usize> {
        self.shared.do_select(Deadline::Immediate, None)
    }

    /// Runs a selection cycle, blocking until at least one endpoint is
    /// ready, [`wakeup`] is called, or `timeout` elapses.
    ///
    /// Timing is best effort. A zero timeout degenerates to an immediate
    /// deadline. Returns the number of keys whose ready set was updated,
    /// zero when the wait ended without readiness.
    ///
    /// [`wakeup`]: #method.wakeup
    pub fn select_timeout(&self, timeout: Duration) -> Result<usize> {
        self.shared.do_select(Deadline::Timeout(timeout), None)
    }

    /// Runs a selection cycle, blocking until at least one endpoint is ready
    /// or [`wakeup`] is called.
    ///
    /// [`wakeup`]: #method.wakeup
    pub fn select(&self) -> Result<usize> {
        self.shared.do_select(Deadline::Infinite, None)
    }

    /// Non-blocking selection that consumes selected keys through `action`.
    ///
    /// The selected set is emptied before polling. After the cycle, every
    /// newly selected key is removed from the set again and handed to
    /// `action`, once per key, carrying its full accumulated ready set for
    /// the cycle. On success the selected set is left empty and the number
    /// of consumed keys is returned.
    ///
    /// The action may cancel keys (purged by the next cycle, not
    /// mid-action), close endpoints, or close this selector; in the latter
    /// case the call fails with [`Error::Closed`] once the consumption pass
    /// completes. An action error aborts the pass: it is relayed unmodified
    /// as [`Error::Action`], keys already consumed stay consumed, and the
    /// rest stay selected. Calling a selection operation from inside the
    /// action is unsupported and implementation-defined.
    ///
    /// [`Error::Closed`]: error/enum.Error.html#variant.Closed
    /// [`Error::Action`]: error/enum.Error.html#variant.Action
    pub fn select_now_with<F>(&self, mut action: F) -> Result<usize>
    where
        F: FnMut(&Key) -> anyhow::Result<()>,
    {
        self.shared.do_select(Deadline::Immediate, Some(&mut action))
    }

    /// Like [`select_timeout`], consuming selected keys through `action`.
    ///
    /// See [`select_now_with`] for the consumption contract.
    ///
    /// [`select_timeout`]: #method.select_timeout
    /// [`select_now_with`]: #method.select_now_with
    pub fn select_timeout_with<F>(&self, timeout: Duration, mut action: F) -> Result<usize>
    where
        F: FnMut(&Key) -> anyhow::Result<()>,
    {
        self.shared
            .do_select(Deadline::Timeout(timeout), Some(&mut action))
    }

    /// Like [`select`], consuming selected keys through `action`.
    ///
    /// See [`select_now_with`] for the consumption contract.
    ///
    /// [`select`]: #method.select
    /// [`select_now_with`]: #method.select_now_with
    pub fn select_with<F>(&self, mut action: F) -> Result<usize>
    where
        F: FnMut(&Key) -> anyhow::Result<()>,
    {
        self.shared.do_select(Deadline::Infinite, Some(&mut action))
    }

    /// Makes the first blocked (or, failing that, the next) selection
    /// operation return immediately.
    ///
    /// Any number of wakeups between two selection operations have the same
    /// effect as one. Usable after close.
    pub fn wakeup(&self) -> std::io::Result<()> {
        trace!("selector {}: wakeup", self.shared.id);
        self.shared.poller.wake()
    }

    /// Closes the selector.
    ///
    /// Idempotent and terminal. Interrupts an in-progress blocking selection
    /// the way [`wakeup`] does, invalidates every still-valid key,
    /// deregisters every endpoint, and releases the poller's resources.
    /// Afterwards every operation except `wakeup` and `close` fails with
    /// [`Error::Closed`].
    ///
    /// [`wakeup`]: #method.wakeup
    /// [`Error::Closed`]: error/enum.Error.html#variant.Closed
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("selector {}: closing", shared.id);

        // Release a selection blocked inside the poller, then wait for its
        // cycle to finish. The cycle gate is reentrant, so an action closing
        // its own selector tears down right here instead of deadlocking.
        let _ = shared.poller.wake();
        let _cycle = shared.cycle.lock();
        let mut selected = shared.selected.lock();
        let mut cancelled = shared.cancelled.lock();
        let mut keys = shared.keys.write();

        for (_, key) in keys.iter() {
            key.invalidate();
            key.endpoint().deregister();
        }
        let drained = keys.len();
        keys.clear();
        cancelled.clear();
        selected.clear();
        drop(keys);
        drop(cancelled);
        drop(selected);

        debug!("selector {}: closed, {} keys dropped", shared.id, drained);
        shared.poller.close().map_err(Error::Io)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Selector")
            .field("id", &self.shared.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Shared {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn enqueue_cancelled(&self, key: Key) {
        trace!("selector {}: cancel {:?}", self.id, key.token());
        self.cancelled.lock().push(key);
    }

    /// One selection cycle: purge, poll, re-purge, then the optional
    /// consumption pass.
    fn do_select(&self, deadline: Deadline, mut action: Option<Action<'_>>) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        let _cycle = self.cycle.lock();
        if !self.is_open() {
            return Err(Error::Closed);
        }

        // Step 1. The consuming variants also start from an empty selected
        // set, so every key handed to the action this cycle is newly ready.
        {
            let mut selected = self.selected.lock();
            self.purge(&mut selected);
            if action.is_some() {
                selected.clear();
            }
        }

        // Interest is snapshotted here; changes made while the poll is in
        // flight belong to the next cycle. Slab iteration is in token order,
        // which the lookup below relies on.
        let entries: Vec<PollEntry> = {
            let keys = self.keys.read();
            keys.iter()
                .filter_map(|(_, key)| {
                    if key.is_cancelled() {
                        return None;
                    }
                    let interest = key.interest();
                    if interest.is_empty() {
                        return None;
                    }
                    Some(PollEntry::new(key.token(), interest, key.endpoint().clone()))
                })
                .collect()
        };

        trace!(
            "selector {}: poll {} entries, deadline {:?}",
            self.id,
            entries.len(),
            deadline
        );
        let events = self.poller.poll(&entries, deadline).map_err(Error::Io)?;

        let mut updated = 0;
        {
            let mut selected = self.selected.lock();
            let keys = self.keys.read();
            for event in &events {
                let token = event.token();
                let key = match keys.get(token.0) {
                    Some(key) => key,
                    None => continue,
                };
                if key.is_cancelled() {
                    continue;
                }
                let snapshot = match entries.binary_search_by_key(&token, PollEntry::token) {
                    Ok(idx) => entries[idx].interest(),
                    Err(_) => continue,
                };
                let ops = event.readiness() & snapshot;
                if ops.is_empty() {
                    continue;
                }
                if selected.contains_token(token) {
                    let previous = key.union_ready(ops);
                    if !(ops - previous).is_empty() {
                        updated += 1;
                    }
                } else {
                    key.set_ready(ops);
                    selected.insert(key.clone());
                    updated += 1;
                }
            }

            // Step 3.
            self.purge(&mut selected);
        }
        trace!(
            "selector {}: cycle done, {} events, {} keys updated",
            self.id,
            events.len(),
            updated
        );

        if let Some(action) = action.as_mut() {
            let mut consumed = 0;
            loop {
                // The lock is released before invoking the action, which may
                // cancel keys or close the selector.
                let key = self.selected.lock().pop();
                let key = match key {
                    Some(key) => key,
                    None => break,
                };
                consumed += 1;
                if let Err(err) = action(&key) {
                    return Err(Error::Action(err));
                }
            }
            if !self.is_open() {
                return Err(Error::Closed);
            }
            return Ok(consumed);
        }

        Ok(updated)
    }

    /// Purge step: removes every cancelled key from the key set and the
    /// selected set and deregisters its endpoint. Caller holds the cycle
    /// gate and the selected lock.
    fn purge(&self, selected: &mut SelectedSet) {
        let victims: Vec<Key> = {
            let mut cancelled = self.cancelled.lock();
            if cancelled.is_empty() {
                return;
            }
            cancelled.drain(..).collect()
        };

        let mut keys = self.keys.write();
        for key in victims {
            let token = key.token();
            if keys.contains(token.0) {
                keys.remove(token.0);
            }
            selected.remove_token(token);
            key.endpoint().deregister();
            debug!("selector {}: purged {:?}", self.id, token);
        }
    }
}

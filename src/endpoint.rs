//! The endpoint collaborator contract.

use crate::event::Ops;

/// An I/O-capable resource that can be registered with a [`Selector`].
///
/// The selector never performs I/O on an endpoint. It only asks the injected
/// [`Poller`] which registered endpoints are ready, and notifies an endpoint
/// through [`deregister`] once its registration has been purged.
///
/// There are two kinds of `Endpoint` values:
///
/// * **System** handles, backed by sockets or other OS resources. A poller
///   that understands them monitors their readiness at the OS level.
///
/// * **User** handles, driven entirely in user space. The crate ships one of
///   these, [`SignalEndpoint`], whose readiness is flipped through a
///   [`SetReadiness`] handle.
///
/// An endpoint that is closed out of band must cancel every [`Key`] bound to
/// it; the selector defers the actual removal to the next selection cycle.
///
/// [`Selector`]: ../struct.Selector.html
/// [`Poller`]: ../poller/trait.Poller.html
/// [`SignalEndpoint`]: ../poller/signal/struct.SignalEndpoint.html
/// [`SetReadiness`]: ../poller/signal/struct.SetReadiness.html
/// [`Key`]: ../struct.Key.html
/// [`deregister`]: #method.deregister
pub trait Endpoint: Send + Sync {
    /// The operations this endpoint can ever report ready.
    ///
    /// Registering interest outside this set, or shrinking to it later via
    /// [`Key::set_interest`], is a usage error. The default accepts every
    /// operation kind.
    ///
    /// [`Key::set_interest`]: ../struct.Key.html#method.set_interest
    fn valid_ops(&self) -> Ops {
        Ops::all()
    }

    /// Reports which of the operations in `interest` are currently ready.
    ///
    /// Invoked only by a [`Poller`] while a selection cycle is querying
    /// readiness. The result is masked with the interest snapshot the cycle
    /// took at its start.
    ///
    /// [`Poller`]: ../poller/trait.Poller.html
    fn query_ready(&self, interest: Ops) -> Ops;

    /// Notification that the endpoint's registration has been purged.
    ///
    /// Invoked exactly once per registration, during the purge step of a
    /// selection cycle or during selector close. Must not call back into the
    /// selector; the purge runs with the selector's internal locks held.
    fn deregister(&self) {}
}

//! End-to-end coverage of the selection protocol.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::thread::scope;
use muxio::{Deadline, Endpoint, Error, Event, Ops, PollEntry, Poller, Selector, SignalPoller};

fn init() {
    let _ = env_logger::try_init();
}

/// Endpoint with application-controlled readiness and a deregistration
/// counter. Readiness changes do not signal a blocked poll; pair it with
/// the non-blocking entry points.
struct TestEndpoint {
    ready: AtomicUsize,
    valid: Ops,
    deregistered: AtomicUsize,
}

impl TestEndpoint {
    fn new() -> TestEndpoint {
        TestEndpoint::with_valid(Ops::all())
    }

    fn with_valid(valid: Ops) -> TestEndpoint {
        TestEndpoint {
            ready: AtomicUsize::new(0),
            valid,
            deregistered: AtomicUsize::new(0),
        }
    }

    fn set_ready(&self, ops: Ops) {
        self.ready.store(ops.as_usize(), Ordering::SeqCst);
    }

    fn deregistered(&self) -> usize {
        self.deregistered.load(Ordering::SeqCst)
    }
}

impl Endpoint for TestEndpoint {
    fn valid_ops(&self) -> Ops {
        self.valid
    }

    fn query_ready(&self, interest: Ops) -> Ops {
        Ops::from_usize(self.ready.load(Ordering::SeqCst)) & interest
    }

    fn deregister(&self) {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poller that always fails, standing in for a broken OS backend.
struct FailPoller;

impl Poller for FailPoller {
    fn poll(&self, _entries: &[PollEntry], _deadline: Deadline) -> io::Result<Vec<Event>> {
        Err(io::Error::new(io::ErrorKind::Other, "backend failure"))
    }

    fn wake(&self) -> io::Result<()> {
        Ok(())
    }
}

fn selector() -> Selector {
    Selector::new(SignalPoller::new())
}

#[test]
fn key_set_tracks_registrations_and_purges() {
    init();
    let selector = selector();
    let e1 = Arc::new(TestEndpoint::new());
    let e2 = Arc::new(TestEndpoint::new());
    let e3 = Arc::new(TestEndpoint::new());

    let k1 = selector.register(e1.clone(), Ops::readable()).unwrap();
    let k2 = selector.register(e2.clone(), Ops::readable()).unwrap();
    let k3 = selector.register(e3.clone(), Ops::readable()).unwrap();
    assert_eq!(selector.keys().unwrap().len(), 3);

    // Cancellation is deferred: the key stays in the key set until the next
    // cycle purges it.
    k2.cancel();
    assert!(!k2.is_valid());
    assert_eq!(selector.keys().unwrap().len(), 3);
    assert_eq!(e2.deregistered(), 0);

    selector.select_now().unwrap();
    let keys = selector.keys().unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&k1));
    assert!(keys.contains(&k3));
    assert_eq!(e2.deregistered(), 1);
    assert_eq!(e1.deregistered(), 0);
    assert_eq!(e3.deregistered(), 0);
}

#[test]
fn cancel_is_idempotent() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    key.cancel();
    key.cancel();
    selector.select_now().unwrap();

    assert!(selector.keys().unwrap().is_empty());
    assert_eq!(endpoint.deregistered(), 1);

    // A second cycle must not purge (or deregister) again.
    selector.select_now().unwrap();
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn close_is_idempotent() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    selector.close().unwrap();
    selector.close().unwrap();

    assert!(!selector.is_open());
    assert!(!key.is_valid());
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn ready_set_accumulates_by_union() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector
        .register(endpoint.clone(), Ops::readable() | Ops::writable())
        .unwrap();

    endpoint.set_ready(Ops::readable());
    assert_eq!(selector.select_now().unwrap(), 1);
    assert_eq!(key.ready(), Ops::readable());

    // Still selected; newly reported writability joins the recorded bits.
    endpoint.set_ready(Ops::writable());
    assert_eq!(selector.select_now().unwrap(), 1);
    assert_eq!(key.ready(), Ops::readable() | Ops::writable());

    // Nothing new to report: the key's ready set is untouched.
    assert_eq!(selector.select_now().unwrap(), 0);
    assert_eq!(key.ready(), Ops::readable() | Ops::writable());
}

#[test]
fn reinserted_key_discards_stale_ready_bits() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector
        .register(endpoint.clone(), Ops::readable() | Ops::writable())
        .unwrap();

    endpoint.set_ready(Ops::readable());
    selector.select_now().unwrap();
    assert_eq!(key.ready(), Ops::readable());

    // Consumer removes the key; its stale ready bits survive removal.
    assert!(selector.selected_keys().unwrap().remove(&key));
    assert_eq!(key.ready(), Ops::readable());

    // Re-insertion replaces the ready set with exactly what was reported.
    endpoint.set_ready(Ops::writable());
    assert_eq!(selector.select_now().unwrap(), 1);
    assert_eq!(key.ready(), Ops::writable());
    assert!(selector.selected_keys().unwrap().contains(&key));
}

#[test]
fn empty_interest_skips_key() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    endpoint.set_ready(Ops::readable());
    key.set_interest(Ops::empty()).unwrap();
    assert_eq!(selector.select_now().unwrap(), 0);
    assert!(selector.selected_keys().unwrap().is_empty());

    // Restored interest is visible to the next cycle.
    key.set_interest(Ops::readable()).unwrap();
    assert_eq!(selector.select_now().unwrap(), 1);
    assert!(key.ready().is_readable());
}

#[test]
fn scenario_cancel_one_of_two() {
    init();
    let selector = selector();
    let a = Arc::new(TestEndpoint::new());
    let b = Arc::new(TestEndpoint::new());
    let key_a = selector.register(a.clone(), Ops::readable()).unwrap();
    let key_b = selector.register(b.clone(), Ops::readable()).unwrap();

    a.set_ready(Ops::readable());
    assert_eq!(selector.select_now().unwrap(), 1);
    {
        let mut selected = selector.selected_keys().unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected.contains(&key_a));
        selected.clear();
    }

    key_b.cancel();
    // B is purged; the count reflects only A's current readiness.
    assert_eq!(selector.select_now().unwrap(), 1);
    let keys = selector.keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys.contains(&key_a));
    assert_eq!(b.deregistered(), 1);
}

#[test]
fn duplicate_registration_returns_same_key() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());

    let first = selector.register(endpoint.clone(), Ops::readable()).unwrap();
    let second = selector
        .register(endpoint.clone(), Ops::readable() | Ops::writable())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.interest(), Ops::readable() | Ops::writable());
    assert_eq!(selector.keys().unwrap().len(), 1);
}

#[test]
fn interest_outside_valid_ops_is_rejected() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::with_valid(Ops::readable()));

    match selector.register(endpoint.clone(), Ops::writable()) {
        Err(Error::InvalidInterest { requested, valid }) => {
            assert_eq!(requested, Ops::writable());
            assert_eq!(valid, Ops::readable());
        }
        other => panic!("expected InvalidInterest, got {:?}", other.map(|_| ())),
    }
    // Fail fast: nothing was registered.
    assert!(selector.keys().unwrap().is_empty());

    let key = selector.register(endpoint, Ops::readable()).unwrap();
    assert!(matches!(
        key.set_interest(Ops::readable() | Ops::acceptable()),
        Err(Error::InvalidInterest { .. })
    ));
    assert_eq!(key.interest(), Ops::readable());
}

#[test]
fn provider_failure_surfaces_and_purges_stick() {
    init();
    let selector = Selector::new(FailPoller);
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    key.cancel();
    assert!(matches!(selector.select_now(), Err(Error::Io(_))));

    // The step-1 purge ran before the poll failed and is not rolled back.
    assert!(selector.keys().unwrap().is_empty());
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn wakeups_coalesce_into_one_early_return() {
    init();
    let selector = selector();

    selector.wakeup().unwrap();
    selector.wakeup().unwrap();
    selector.wakeup().unwrap();

    // The pending wake is consumed by exactly one selection call.
    let start = Instant::now();
    assert_eq!(selector.select().unwrap(), 0);
    assert!(start.elapsed() < Duration::from_secs(5));

    let start = Instant::now();
    assert_eq!(
        selector.select_timeout(Duration::from_millis(150)).unwrap(),
        0
    );
    assert!(start.elapsed() >= Duration::from_millis(120));
}

#[test]
fn blocking_select_times_out() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    selector.register(endpoint, Ops::readable()).unwrap();

    let start = Instant::now();
    let updated = selector.select_timeout(Duration::from_millis(100)).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(updated, 0);
    assert!(elapsed >= Duration::from_millis(80), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "hung for {:?}", elapsed);
}

#[test]
fn blocking_select_wakes_on_readiness() {
    init();
    let poller = SignalPoller::new();
    let (endpoint, readiness) = poller.readiness();
    let selector = Selector::new(poller.clone());
    let key = selector.register(endpoint, Ops::readable()).unwrap();

    scope(|s| {
        s.spawn(|_| {
            thread::sleep(Duration::from_millis(100));
            readiness.set_readiness(Ops::readable());
        });

        let updated = selector.select().unwrap();
        assert_eq!(updated, 1);
    })
    .unwrap();

    assert!(key.ready().is_readable());
    assert!(selector.selected_keys().unwrap().contains(&key));
}

#[test]
fn cancel_and_wakeup_from_another_thread() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    scope(|s| {
        s.spawn(|_| {
            thread::sleep(Duration::from_millis(50));
            key.cancel();
            selector.wakeup().unwrap();
        });

        let start = Instant::now();
        let updated = selector.select_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(updated, 0);
        assert!(start.elapsed() < Duration::from_secs(9));
    })
    .unwrap();

    selector.select_now().unwrap();
    assert!(selector.keys().unwrap().is_empty());
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn concurrent_selects_serialize_on_the_cycle() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    selector.register(endpoint, Ops::readable()).unwrap();

    let start = Instant::now();
    scope(|s| {
        for _ in 0..2 {
            s.spawn(|_| {
                let updated = selector.select_timeout(Duration::from_millis(100)).unwrap();
                assert_eq!(updated, 0);
            });
        }
    })
    .unwrap();

    // The second caller waited for the first cycle to finish.
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[test]
fn action_select_drains_the_selected_set() {
    init();
    let selector = selector();
    let e1 = Arc::new(TestEndpoint::new());
    let e2 = Arc::new(TestEndpoint::new());
    selector.register(e1.clone(), Ops::readable()).unwrap();
    selector.register(e2.clone(), Ops::writable()).unwrap();

    e1.set_ready(Ops::readable());
    e2.set_ready(Ops::writable());

    let visited = AtomicUsize::new(0);
    let consumed = selector
        .select_now_with(|key| {
            assert!(!key.ready().is_empty());
            visited.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert_eq!(consumed, 2);
    assert_eq!(visited.load(Ordering::SeqCst), 2);
    assert!(selector.selected_keys().unwrap().is_empty());
}

#[test]
fn action_clears_leftover_selected_keys_before_polling() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    endpoint.set_ready(Ops::readable());
    selector.select_now().unwrap();
    assert!(selector.selected_keys().unwrap().contains(&key));

    // The endpoint is no longer ready; the leftover entry must not leak
    // into the consumption pass.
    endpoint.set_ready(Ops::empty());
    let consumed = selector.select_now_with(|_| Ok(())).unwrap();
    assert_eq!(consumed, 0);
    assert!(selector.selected_keys().unwrap().is_empty());
}

#[test]
fn action_cancelling_its_key_defers_to_next_cycle() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();
    endpoint.set_ready(Ops::readable());

    let consumed = selector
        .select_now_with(|key| {
            key.cancel();
            Ok(())
        })
        .unwrap();
    assert_eq!(consumed, 1);

    // Cancelled mid-action, purged only by the next cycle.
    assert!(!key.is_valid());
    assert_eq!(selector.keys().unwrap().len(), 1);
    assert_eq!(endpoint.deregistered(), 0);

    selector.select_now().unwrap();
    assert!(selector.keys().unwrap().is_empty());
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn action_closing_the_selector_fails_after_the_pass() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();
    endpoint.set_ready(Ops::readable());

    let visited = AtomicUsize::new(0);
    let result = selector.select_now_with(|_| {
        visited.fetch_add(1, Ordering::SeqCst);
        selector.close()?;
        Ok(())
    });

    // The key was consumed, then the call reported the close.
    assert_eq!(visited.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(Error::Closed)));
    assert!(!selector.is_open());
    assert!(!key.is_valid());
    assert_eq!(endpoint.deregistered(), 1);
}

#[test]
fn action_error_relays_and_keeps_unconsumed_keys() {
    init();
    let selector = selector();
    let e1 = Arc::new(TestEndpoint::new());
    let e2 = Arc::new(TestEndpoint::new());
    selector.register(e1.clone(), Ops::readable()).unwrap();
    selector.register(e2.clone(), Ops::readable()).unwrap();

    e1.set_ready(Ops::readable());
    e2.set_ready(Ops::readable());

    let result = selector.select_now_with(|_| Err(anyhow::anyhow!("consumer exploded")));
    match result {
        Err(Error::Action(err)) => assert_eq!(err.to_string(), "consumer exploded"),
        other => panic!("expected Action error, got {:?}", other.map(|_| ())),
    }

    // One key was drained before the failure; the other stays selected.
    assert_eq!(selector.selected_keys().unwrap().len(), 1);
}

#[test]
fn operations_fail_after_close() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint.clone(), Ops::readable()).unwrap();

    selector.close().unwrap();

    assert!(matches!(selector.select_now(), Err(Error::Closed)));
    assert!(matches!(
        selector.select_timeout(Duration::from_millis(10)),
        Err(Error::Closed)
    ));
    assert!(matches!(selector.select_now_with(|_| Ok(())), Err(Error::Closed)));
    assert!(matches!(
        selector.register(Arc::new(TestEndpoint::new()), Ops::readable()),
        Err(Error::Closed)
    ));
    assert!(matches!(selector.keys(), Err(Error::Closed)));
    assert!(selector.selected_keys().is_err());
    assert!(matches!(key.set_interest(Ops::writable()), Err(Error::Closed)));

    // The control path stays usable.
    selector.wakeup().unwrap();
    selector.close().unwrap();
}

#[test]
fn close_wakes_a_blocked_select() {
    init();
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    selector.register(endpoint, Ops::readable()).unwrap();

    scope(|s| {
        let handle = s.spawn(|_| selector.select_timeout(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        selector.close().unwrap();
        // Close waited only for the interrupted cycle, not the full timeout.
        assert!(start.elapsed() < Duration::from_secs(5));

        // The in-flight selection is interrupted like a wakeup; a selection
        // that had not yet entered its cycle observes the close instead.
        match handle.join().unwrap() {
            Ok(updated) => assert_eq!(updated, 0),
            Err(Error::Closed) => {}
            Err(err) => panic!("unexpected error: {}", err),
        }
    })
    .unwrap();

    assert!(matches!(selector.select_now(), Err(Error::Closed)));
}

#[test]
fn cancelled_key_set_interest_fails() {
    let selector = selector();
    let endpoint = Arc::new(TestEndpoint::new());
    let key = selector.register(endpoint, Ops::readable()).unwrap();

    key.cancel();
    assert!(matches!(key.set_interest(Ops::writable()), Err(Error::Cancelled)));
}

#[test]
fn randomized_readiness_roundtrips_through_actions() {
    use rand::Rng;

    init();
    let poller = SignalPoller::new();
    let selector = Selector::new(poller.clone());

    let mut handles = Vec::new();
    for _ in 0..6 {
        let (endpoint, readiness) = poller.readiness();
        selector.register(endpoint, Ops::readable()).unwrap();
        handles.push(readiness);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let mut expected = 0;
        for readiness in &handles {
            if rng.gen_bool(0.5) {
                readiness.set_readiness(Ops::readable());
                expected += 1;
            } else {
                readiness.set_readiness(Ops::empty());
            }
        }

        let consumed = selector
            .select_now_with(|key| {
                assert_eq!(key.ready(), Ops::readable());
                Ok(())
            })
            .unwrap();
        assert_eq!(consumed, expected);
    }
}

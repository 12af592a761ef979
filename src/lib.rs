//! # Readiness-based I/O multiplexing
//!
//! A [`Selector`] lets a caller register interest in any number of I/O
//! endpoints, block until at least one becomes ready, and retrieve exactly
//! which endpoints and operations are ready. The OS readiness backend is an
//! injectable [`Poller`]; the crate ships [`SignalPoller`], an in-process
//! provider whose endpoints are driven from user space.
//!
//! # Examples
//! __Consuming readiness through an action__
//! ```rust
//! use muxio::{Ops, Selector, SignalPoller};
//!
//! fn main() -> muxio::Result<()> {
//!     let poller = SignalPoller::new();
//!     let (endpoint, readiness) = poller.readiness();
//!     let selector = Selector::new(poller.clone());
//!
//!     selector.register(endpoint, Ops::readable() | Ops::writable())?;
//!     readiness.set_readiness(Ops::readable());
//!
//!     let consumed = selector.select_now_with(|key| {
//!         assert!(key.ready().is_readable());
//!         Ok(())
//!     })?;
//!     assert_eq!(consumed, 1);
//!
//!     selector.close()?;
//!     Ok(())
//! }
//! ```
//! __Waking a blocked selection from another thread__
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::thread;
//! use muxio::{Selector, SignalPoller};
//!
//! fn main() -> muxio::Result<()> {
//!     let selector = Arc::new(Selector::new(SignalPoller::new()));
//!
//!     let waker = selector.clone();
//!     thread::spawn(move || {
//!         waker.wakeup().expect("waking shouldn't fail");
//!     });
//!
//!     // Returns once the other thread wakes us.
//!     let updated = selector.select()?;
//!     assert_eq!(updated, 0);
//!     Ok(())
//! }
//! ```

#![warn(
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations,
    missing_docs
)]
#![allow(clippy::new_without_default)]

pub mod endpoint;
pub mod error;
pub mod event;
pub mod key;
pub mod poller;
pub mod selected;
pub mod selector;
pub mod token;

#[doc(inline)]
pub use crate::endpoint::Endpoint;
#[doc(inline)]
pub use crate::error::{Error, Result};
#[doc(inline)]
pub use crate::event::{Event, Ops};
#[doc(inline)]
pub use crate::key::Key;
#[doc(inline)]
pub use crate::poller::signal::{SetReadiness, SignalEndpoint, SignalPoller};
#[doc(inline)]
pub use crate::poller::{Deadline, PollEntry, Poller};
#[doc(inline)]
pub use crate::selected::SelectedKeys;
#[doc(inline)]
pub use crate::selector::Selector;
#[doc(inline)]
pub use crate::token::Token;

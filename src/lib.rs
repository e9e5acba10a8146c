//! Deferred values: a value container that is settled at most once by a
//! producer and observed by any number of continuations.
//!
//! Continuations are never run from the call that settled the value. They are
//! always handed to a [`Scheduler`] and run on a later turn, in the order they
//! were attached.
//!
//! # Examples
//!
//! ```
//! use deferred::{scheduler, Deferred, DeferredState, Error, Resolution};
//!
//! let d: Deferred<i32> = Deferred::new(|fulfill, _reject| {
//!     fulfill.call(42);
//!     Ok(())
//! });
//! let next = d.then(|v| Ok(Resolution::Value(v + 1)));
//! assert!(next.is_pending());
//!
//! scheduler::run_microtasks();
//! assert_eq!(next.state(), DeferredState::<i32, Error>::Fulfilled(43));
//! ```
//!
pub mod deferred;
pub mod hooks;
pub mod resolution;
pub mod resolver;
pub mod scheduler;
pub mod settled;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use deferred::{Deferred, DeferredState, OnFulfilled, OnRejected};
pub use resolution::{Capability, Resolution, ThenFn, Thenable};
pub use resolver::{Fulfill, Reject};
pub use scheduler::{ChannelScheduler, MicrotaskQueue, Scheduler, Task, TaskDrain};
pub use settled::Settled;

/// Reasons produced by the deferred machinery itself.
///
/// Callers that reject with their own reason type only need a
/// `From<Error>` conversion so these can be delivered through it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("a deferred cannot be resolved with itself")]
    SelfResolution,
    #[error("deferred executor is not callable")]
    ExecutorNotCallable,
    #[error("{0}")]
    Rejected(String),
}

impl From<&str> for Error {
    fn from(reason: &str) -> Self {
        Error::Rejected(reason.to_owned())
    }
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Error::Rejected(reason)
    }
}

/// Identity of a deferred, stable for its whole lifetime. Handed to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeferredId(u64);

impl DeferredId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DeferredId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferred#{}", self.0)
    }
}

use crate::{Deferred, Error};
use std::{
    fmt,
    fmt::Debug,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Resolves to the effective outcome of a [`Deferred`]. Any number of these
/// may wait on the same deferred; each gets its own clone of the outcome.
///
/// Waiters are woken as soon as the effective deferred settles. A deferred
/// returned by `then`/`chain` only settles once its scheduler runs the
/// dispatch, so the task awaiting such a result must not be the one that
/// drains that scheduler.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Deferred};
/// use futures::executor::block_on;
///
/// let d: Deferred<String> = Deferred::fulfilled("🍓".to_owned());
/// let doubled = d.then(|v| Ok(deferred::Resolution::Value(v.repeat(2))));
/// scheduler::run_microtasks();
/// assert_eq!(block_on(doubled.settled()), Ok("🍓🍓".to_owned()));
/// ```
pub struct Settled<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(deferred: Deferred<T, E>) -> Self {
        Self { deferred }
    }
}

impl<T, E> Future for Settled<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.deferred.poll_outcome(cx)
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Settled").field(&self.deferred).finish()
    }
}

use crate::{resolution::settle_with, Deferred, Error, Resolution};
use std::{cell::Cell, fmt, fmt::Debug, rc::Rc};

/// The fulfilling half of a settle-once capability pair.
///
/// Handed to an executor (or to a foreign thenable's `then` capability)
/// together with its [`Reject`] twin. Whichever of the two is called first
/// settles the target; every later call on either half is ignored.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Deferred, DeferredState, Error};
///
/// let d: Deferred<&str> = Deferred::new(|fulfill, reject| {
///     fulfill.call("first");
///     fulfill.call("second");
///     reject.call(Error::from("too late"));
///     Ok(())
/// });
/// scheduler::run_microtasks();
/// assert_eq!(d.state(), DeferredState::Fulfilled("first"));
/// ```
pub struct Fulfill<T, E> {
    target: Deferred<T, E>,
    done: Rc<Cell<bool>>,
}

/// The rejecting half of a settle-once capability pair. See [`Fulfill`].
pub struct Reject<T, E> {
    target: Deferred<T, E>,
    done: Rc<Cell<bool>>,
}

impl<T, E> Fulfill<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    /// Fulfill with a plain value.
    pub fn call(&self, value: T) {
        self.resolve(Resolution::Value(value));
    }

    /// Feed `incoming` through the resolution procedure, which may adopt
    /// another deferred or a foreign thenable.
    pub fn resolve(&self, incoming: Resolution<T, E>) {
        if self.done.replace(true) {
            tracing::trace!(deferred = %self.target.id(), "ignoring repeated settlement");
            return;
        }
        settle_with(&self.target, incoming);
    }

    /// Whether either half of the pair has been used.
    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    /// Reject with `reason`. The reason is stored as-is and never inspected.
    pub fn call(&self, reason: E) {
        if self.done.replace(true) {
            tracing::trace!(deferred = %self.target.id(), "ignoring repeated settlement");
            return;
        }
        self.target.reject_with(reason);
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl<T, E> Clone for Fulfill<T, E> {
    fn clone(&self) -> Self {
        Self { target: self.target.clone(), done: self.done.clone() }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self { target: self.target.clone(), done: self.done.clone() }
    }
}

impl<T, E> fmt::Debug for Fulfill<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fulfill")
            .field("target", &self.target.id())
            .field("done", &self.done.get())
            .finish()
    }
}

impl<T, E> fmt::Debug for Reject<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reject")
            .field("target", &self.target.id())
            .field("done", &self.done.get())
            .finish()
    }
}

/// Call `producer` once, synchronously, with a fresh capability pair bound to
/// `target`. An error returned before either capability was used rejects the
/// target; an error returned afterwards is dropped.
pub(crate) fn invoke<T, E, F>(producer: F, target: &Deferred<T, E>)
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
    F: FnOnce(Fulfill<T, E>, Reject<T, E>) -> Result<(), E>,
{
    let done = Rc::new(Cell::new(false));
    let fulfill = Fulfill { target: target.clone(), done: done.clone() };
    let reject = Reject { target: target.clone(), done: done.clone() };
    if let Err(reason) = producer(fulfill, reject) {
        if done.replace(true) {
            tracing::trace!(deferred = %target.id(), ?reason, "dropping error raised after settlement");
        } else {
            target.reject_with(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{scheduler::MicrotaskQueue, Deferred, DeferredState, Error};
    use std::rc::Rc;

    fn deferred<F>(queue: &MicrotaskQueue, executor: F) -> Deferred<i32>
    where
        F: FnOnce(super::Fulfill<i32, Error>, super::Reject<i32, Error>) -> Result<(), Error>,
    {
        Deferred::with_scheduler(Rc::new(queue.clone()), executor)
    }

    #[test]
    fn reject_then_fulfill_keeps_rejection() {
        let queue = MicrotaskQueue::new();
        let d = deferred(&queue, |fulfill, reject| {
            reject.call(Error::from("first"));
            fulfill.call(1);
            Ok(())
        });
        assert_eq!(d.state(), DeferredState::Rejected(Error::from("first")));
    }

    #[test]
    fn reject_twice_keeps_first_reason() {
        let queue = MicrotaskQueue::new();
        let d = deferred(&queue, |_, reject| {
            reject.call(Error::from("a"));
            reject.call(Error::from("b"));
            Ok(())
        });
        assert_eq!(d.state(), DeferredState::Rejected(Error::from("a")));
    }

    #[test]
    fn error_after_settlement_is_dropped() {
        let queue = MicrotaskQueue::new();
        let d = deferred(&queue, |fulfill, _| {
            fulfill.call(5);
            Err(Error::from("late"))
        });
        assert_eq!(d.state(), DeferredState::Fulfilled(5));
    }

    #[test]
    fn capabilities_outlive_the_executor() {
        let queue = MicrotaskQueue::new();
        let mut slot = None;
        let d = deferred(&queue, |fulfill, _| {
            slot = Some(fulfill);
            Ok(())
        });
        assert!(d.is_pending());
        let fulfill = slot.expect("executor ran synchronously");
        assert!(!fulfill.is_done());
        fulfill.call(9);
        assert!(fulfill.is_done());
        assert_eq!(d.state(), DeferredState::Fulfilled(9));
    }

    #[test]
    fn debug_names_the_target() {
        let queue = MicrotaskQueue::new();
        let mut slot = None;
        let d = deferred(&queue, |fulfill, reject| {
            slot = Some((fulfill, reject));
            Ok(())
        });
        let (fulfill, reject) = slot.expect("executor ran synchronously");
        let target = format!("target: {:?}", d.id());
        assert!(format!("{fulfill:?}").starts_with("Fulfill"));
        assert!(format!("{fulfill:?}").contains(&target));
        assert!(format!("{reject:?}").contains(&target));
        reject.call(Error::from("x"));
        assert!(format!("{fulfill:?}").contains("done: true"));
    }
}

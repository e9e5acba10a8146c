//! The deferred entity: a settle-once state machine with a registry of
//! continuations that are dispatched through a [`Scheduler`].
//!
//! Every chaining call returns a new deferred synchronously. Continuations
//! never run inline: once the source settles they are handed to the
//! scheduler, in attachment order, and each runs exactly once.
//!
use crate::{
    hooks,
    resolution::{settle_with, Capability, Resolution, Thenable},
    resolver::{invoke, Fulfill, Reject},
    scheduler::{self, Scheduler},
    settled::Settled,
    DeferredId, Error,
};
use std::{
    cell::RefCell,
    convert::identity,
    fmt,
    fmt::Debug,
    mem,
    rc::Rc,
    task::{Context, Poll, Waker},
};

pub type OnFulfilled<T, U, E> = Box<dyn FnOnce(T) -> Result<Resolution<U, E>, E>>;
pub type OnRejected<U, E> = Box<dyn FnOnce(E) -> Result<Resolution<U, E>, E>>;

/// Effective state of a deferred, as observed from outside. Adoption is
/// already followed, so this never reports the indirection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredState<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
    /// Mirrors another deferred. Follow the chain to read the outcome.
    Adopting(Deferred<T, E>),
}

struct Inner<T, E> {
    id: DeferredId,
    state: State<T, E>,
    continuations: Vec<Box<dyn Reaction<T, E>>>,
    wakers: Vec<Waker>,
    scheduler: Rc<dyn Scheduler>,
}

/// A value that is not available yet.
///
/// `Deferred` is a cheap handle; clones refer to the same entity.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Deferred, DeferredState, Error, Resolution};
///
/// let inner: Deferred<i32> = Deferred::rejected(Error::from("boom"));
/// let outer: Deferred<i32> = Deferred::resolved(inner.into());
/// let recovered = outer.catch(|_| Ok(Resolution::Value(0)));
///
/// scheduler::run_microtasks();
/// assert_eq!(outer.state(), DeferredState::Rejected(Error::from("boom")));
/// assert_eq!(recovered.state(), DeferredState::Fulfilled(0));
/// ```
pub struct Deferred<T, E = Error> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

/// A registered continuation, type-erased over what its result holds.
trait Reaction<T, E> {
    fn react(self: Box<Self>, outcome: Result<T, E>);

    /// Give up the result deferred without running, for teardown.
    fn release<'a>(self: Box<Self>, work: &mut Vec<Box<dyn Unlink<'a> + 'a>>);
}

/// One step of tearing down a chain of deferreds without recursion.
trait Unlink<'a> {
    fn unlink(self: Box<Self>, work: &mut Vec<Box<dyn Unlink<'a> + 'a>>);
}

impl<'a, T: 'a, E: 'a> Unlink<'a> for Deferred<T, E> {
    fn unlink(self: Box<Self>, work: &mut Vec<Box<dyn Unlink<'a> + 'a>>) {
        // Only the last handle owns the links; others just decrement.
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.borrow_mut().release_links(work);
        }
    }
}

impl<T, E> Inner<T, E> {
    /// Move the adopted deferred and every continuation's result into
    /// `work`, leaving nothing here whose drop could recurse.
    fn release_links<'a>(&mut self, work: &mut Vec<Box<dyn Unlink<'a> + 'a>>)
    where
        T: 'a,
        E: 'a,
    {
        if let State::Adopting(next) = mem::replace(&mut self.state, State::Pending) {
            work.push(Box::new(next));
        }
        for reaction in mem::take(&mut self.continuations) {
            reaction.release(work);
        }
    }
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let mut work = Vec::new();
        self.release_links(&mut work);
        while let Some(link) = work.pop() {
            link.unlink(&mut work);
        }
    }
}

enum FulfillStep<T, U, E> {
    /// No handler: hand the value on unchanged.
    Forward(fn(T) -> U),
    Call(OnFulfilled<T, U, E>),
}

struct Continuation<T, U, E> {
    on_fulfilled: FulfillStep<T, U, E>,
    on_rejected: Option<OnRejected<U, E>>,
    result: Deferred<U, E>,
}

impl<T, U, E> Reaction<T, E> for Continuation<T, U, E>
where
    U: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    fn react(self: Box<Self>, outcome: Result<T, E>) {
        let Continuation { on_fulfilled, on_rejected, result } = *self;
        let returned = match (outcome, on_fulfilled, on_rejected) {
            (Ok(value), FulfillStep::Forward(forward), _) => {
                return result.fulfill_value(forward(value));
            }
            (Ok(value), FulfillStep::Call(handler), _) => handler(value),
            (Err(reason), _, None) => return result.reject_with(reason),
            (Err(reason), _, Some(handler)) => handler(reason),
        };
        match returned {
            Ok(incoming) => settle_with(&result, incoming),
            Err(reason) => result.reject_with(reason),
        }
    }

    fn release<'a>(self: Box<Self>, work: &mut Vec<Box<dyn Unlink<'a> + 'a>>) {
        work.push(Box::new(self.result));
    }
}

impl<T, E> Deferred<T, E> {
    pub fn id(&self) -> DeferredId {
        self.inner.borrow().id
    }

    /// Whether both handles refer to the same entity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_adopting(&self) -> bool {
        matches!(self.inner.borrow().state, State::Adopting(_))
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    /// Create a deferred on the calling thread's default queue and run
    /// `executor` immediately with its capability pair.
    ///
    /// If `executor` returns `Err` before settling, the deferred is rejected
    /// with that error.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Fulfill<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        Self::with_scheduler(Rc::new(scheduler::current()), executor)
    }

    /// Like [`Deferred::new`], dispatching continuations through `scheduler`.
    /// Deferreds chained from this one use the same scheduler.
    pub fn with_scheduler<F>(scheduler: Rc<dyn Scheduler>, executor: F) -> Self
    where
        F: FnOnce(Fulfill<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let deferred = Self::placeholder(scheduler);
        invoke(executor, &deferred);
        deferred
    }

    /// Construct from an executor that may be missing, as when it comes from
    /// a dynamically typed source. A missing executor is a construction error,
    /// not a rejection.
    pub fn try_new<F>(executor: Option<F>) -> Result<Self, Error>
    where
        F: FnOnce(Fulfill<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        executor.map(Self::new).ok_or(Error::ExecutorNotCallable)
    }

    pub fn fulfilled(value: T) -> Self {
        Self::new(|fulfill, _| {
            fulfill.call(value);
            Ok(())
        })
    }

    pub fn rejected(reason: E) -> Self {
        Self::new(|_, reject| {
            reject.call(reason);
            Ok(())
        })
    }

    /// Settle through the resolution procedure, adopting `incoming` if it is
    /// a deferred or thenable.
    pub fn resolved(incoming: Resolution<T, E>) -> Self {
        Self::new(|fulfill, _| {
            fulfill.resolve(incoming);
            Ok(())
        })
    }

    /// A pending deferred no executor will ever touch; settled by dispatch.
    fn placeholder(scheduler: Rc<dyn Scheduler>) -> Self {
        let id = DeferredId::next();
        tracing::trace!(deferred = %id, "created");
        Deferred {
            inner: Rc::new(RefCell::new(Inner {
                id,
                state: State::Pending,
                continuations: Vec::new(),
                wakers: Vec::new(),
                scheduler,
            })),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state(), DeferredState::Pending)
    }

    /// Snapshot of the effective state.
    pub fn state(&self) -> DeferredState<T, E> {
        let target = self.chase();
        let inner = target.inner.borrow();
        match &inner.state {
            State::Fulfilled(value) => DeferredState::Fulfilled(value.clone()),
            State::Rejected(reason) => DeferredState::Rejected(reason.clone()),
            State::Pending | State::Adopting(_) => DeferredState::Pending,
        }
    }

    /// A future resolving to the effective outcome. Observing does not
    /// register a continuation and runs no handlers.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.clone())
    }

    /// Attach optional handlers. A missing handler passes the outcome on
    /// unchanged. The returned deferred is settled by whichever handler runs.
    pub fn chain(
        &self,
        on_fulfilled: Option<OnFulfilled<T, T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Deferred<T, E> {
        let step = match on_fulfilled {
            Some(handler) => FulfillStep::Call(handler),
            None => FulfillStep::Forward(identity),
        };
        self.attach(step, on_rejected)
    }

    /// Transform the fulfilled value. Rejections pass through.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.attach(FulfillStep::Call(Box::new(on_fulfilled)), None)
    }

    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.attach(FulfillStep::Call(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Handle a rejection. Fulfillments pass through.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.attach(FulfillStep::Forward(identity), Some(Box::new(on_rejected)))
    }

    fn attach<U>(
        &self,
        on_fulfilled: FulfillStep<T, U, E>,
        on_rejected: Option<OnRejected<U, E>>,
    ) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        let result = Deferred::placeholder(self.scheduler());
        self.handle(Box::new(Continuation {
            on_fulfilled,
            on_rejected,
            result: result.clone(),
        }));
        result
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.borrow().scheduler.clone()
    }

    /// Follow adoption links to the entity that holds the outcome.
    pub(crate) fn chase(&self) -> Deferred<T, E> {
        let mut current = self.clone();
        loop {
            let next = match &current.inner.borrow().state {
                State::Adopting(next) => Some(next.clone()),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Buffer `reaction` on the effective entity, or schedule it if that
    /// entity has already settled.
    fn handle(&self, reaction: Box<dyn Reaction<T, E>>) {
        let target = self.chase();
        hooks::settle_attempt(target.id());

        let mut guard = target.inner.borrow_mut();
        let inner = &mut *guard;
        if let State::Pending | State::Adopting(_) = inner.state {
            inner.continuations.push(reaction);
            return;
        }
        let scheduler = inner.scheduler.clone();
        drop(guard);

        tracing::trace!(deferred = %target.id(), "scheduling dispatch");
        scheduler.schedule(Box::new(move || target.dispatch(reaction)));
    }

    /// Run `reaction` against the settled outcome. Only ever called from a
    /// scheduled task.
    fn dispatch(&self, reaction: Box<dyn Reaction<T, E>>) {
        let outcome = match &self.inner.borrow().state {
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            State::Pending | State::Adopting(_) => None,
        };
        match outcome {
            Some(outcome) => reaction.react(outcome),
            None => self.handle(reaction),
        }
    }

    pub(crate) fn fulfill_value(&self, value: T) {
        if self.transition(State::Fulfilled(value)) {
            tracing::trace!(deferred = %self.id(), "fulfilled");
            self.finale();
        }
    }

    pub(crate) fn reject_with(&self, reason: E) {
        if self.transition(State::Rejected(reason.clone())) {
            let id = self.id();
            tracing::debug!(deferred = %id, ?reason, "rejected");
            hooks::reject(id, &reason);
            self.finale();
        }
    }

    pub(crate) fn adopt(&self, other: Deferred<T, E>) {
        let other_id = other.id();
        if self.transition(State::Adopting(other)) {
            tracing::trace!(deferred = %self.id(), adopted = %other_id, "adopting");
            self.finale();
        }
    }

    fn transition(&self, next: State<T, E>) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.state, State::Pending) {
            tracing::warn!(deferred = %inner.id, "ignoring settlement of a deferred that already left pending");
            return false;
        }
        inner.state = next;
        true
    }

    /// Release everything waiting on this entity. Buffered continuations are
    /// detached first so anything attached while they are handled is not
    /// processed twice. If this entity is adopting, `handle` moves them on to
    /// the adopted one.
    fn finale(&self) {
        let (continuations, wakers) = {
            let mut inner = self.inner.borrow_mut();
            (mem::take(&mut inner.continuations), mem::take(&mut inner.wakers))
        };
        for reaction in continuations {
            self.handle(reaction);
        }
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<T, E>> {
        let target = self.chase();
        let mut guard = target.inner.borrow_mut();
        let inner = &mut *guard;
        match &inner.state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            State::Pending | State::Adopting(_) => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    fn then_capability(&self) -> Result<Capability<T, E>, E> {
        let source = self.clone();
        Ok(Capability::Then(Box::new(move |fulfill: Fulfill<T, E>, reject: Reject<T, E>| {
            source.then_or_else(
                move |value| {
                    fulfill.call(value);
                    Ok(Resolution::Value(()))
                },
                move |reason| {
                    reject.call(reason);
                    Ok(Resolution::Value(()))
                },
            );
            Ok(())
        })))
    }

    fn as_deferred(&self) -> Option<Deferred<T, E>> {
        Some(self.clone())
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match &inner.state {
            State::Pending => "pending".to_owned(),
            State::Fulfilled(_) => "fulfilled".to_owned(),
            State::Rejected(_) => "rejected".to_owned(),
            State::Adopting(other) => format!("adopting {}", other.inner.borrow().id),
        };
        f.debug_struct("Deferred")
            .field("id", &inner.id)
            .field("state", &state)
            .field("continuations", &inner.continuations.len())
            .finish()
    }
}

//! The resolution procedure: how an incoming fulfillment settles a deferred.
//!
//! A plain value fulfills directly. Anything else is treated as a possible
//! thenable: its `then` capability is read (the read may fail), another
//! [`Deferred`] is adopted by reference, and a foreign thenable is called
//! once with a fresh settle-once capability pair.

use crate::{
    resolver::{invoke, Fulfill, Reject},
    Deferred, Error,
};
use std::{fmt, fmt::Debug, rc::Rc};

/// A `then` capability: called once with a fresh capability pair.
pub type ThenFn<T, E> = Box<dyn FnOnce(Fulfill<T, E>, Reject<T, E>) -> Result<(), E>>;

/// What a thenable exposes when its capability is read.
pub enum Capability<T, E> {
    /// A callable `then`.
    Then(ThenFn<T, E>),
    /// No callable `then`; the object is an ordinary value.
    Plain(T),
}

/// Anything that can settle a deferred through a callback-based `then`.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Capability, Deferred, DeferredState, Error, Fulfill, Reject, Resolution, Thenable};
///
/// struct Ready(i32);
///
/// impl Thenable<i32, Error> for Ready {
///     fn then_capability(&self) -> Result<Capability<i32, Error>, Error> {
///         let value = self.0;
///         Ok(Capability::Then(Box::new(move |fulfill: Fulfill<i32, Error>, _reject: Reject<i32, Error>| {
///             fulfill.call(value);
///             Ok(())
///         })))
///     }
/// }
///
/// let d: Deferred<i32> = Deferred::fulfilled(1);
/// let next = d.then(|_| Ok(Resolution::thenable(Ready(5))));
/// scheduler::run_microtasks();
/// assert_eq!(next.state(), DeferredState::Fulfilled(5));
/// ```
pub trait Thenable<T, E> {
    /// Read the `then` capability. `Err` means the read itself failed.
    fn then_capability(&self) -> Result<Capability<T, E>, E>;

    /// Fast path for implementations that share this crate's adoption
    /// protocol: the deferred to mirror directly instead of calling `then`.
    fn as_deferred(&self) -> Option<Deferred<T, E>> {
        None
    }
}

/// An incoming fulfillment.
pub enum Resolution<T, E> {
    Value(T),
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable<H>(thenable: H) -> Self
    where
        H: Thenable<T, E> + 'static,
    {
        Resolution::Thenable(Rc::new(thenable))
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Thenable(Rc::new(deferred))
    }
}

impl<T: Debug, E> Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Settle `entity` with `incoming`. Called at most once per entity, from the
/// fulfillment path only.
pub(crate) fn settle_with<T, E>(entity: &Deferred<T, E>, incoming: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + Debug + From<Error> + 'static,
{
    let thenable = match incoming {
        Resolution::Value(value) => return entity.fulfill_value(value),
        Resolution::Thenable(thenable) => thenable,
    };

    // Adopting anything whose chain already ends at `entity` would never
    // settle. Only an adopting deferred needs its chain walked.
    let adoptee = thenable.as_deferred();
    if let Some(other) = &adoptee {
        if other.ptr_eq(entity) || (other.is_adopting() && other.chase().ptr_eq(entity)) {
            return entity.reject_with(E::from(Error::SelfResolution));
        }
    }

    let then = match thenable.then_capability() {
        Ok(Capability::Then(then)) => then,
        Ok(Capability::Plain(value)) => return entity.fulfill_value(value),
        Err(reason) => return entity.reject_with(reason),
    };

    match adoptee {
        Some(other) => entity.adopt(other),
        None => invoke(then, entity),
    }
}

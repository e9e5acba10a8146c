//! Instrumentation hooks.
//!
//! Hooks are installed per thread, which is the scope every deferred and its
//! scheduler already live in. They are fire-and-forget: return values are
//! ignored and no internal state is borrowed while they run, so a hook may
//! freely inspect or chain the deferred it is told about.

use crate::DeferredId;
use std::{cell::RefCell, fmt::Debug, rc::Rc};

pub type SettleAttemptHook = Rc<dyn Fn(DeferredId)>;
pub type RejectHook = Rc<dyn Fn(DeferredId, &dyn Debug)>;

thread_local! {
    static ON_SETTLE_ATTEMPT: RefCell<Option<SettleAttemptHook>> = const { RefCell::new(None) };
    static ON_REJECT: RefCell<Option<RejectHook>> = const { RefCell::new(None) };
}

/// Install the hook run whenever a continuation is attached. Returns the
/// previously installed hook.
pub fn set_on_settle_attempt(hook: Option<SettleAttemptHook>) -> Option<SettleAttemptHook> {
    ON_SETTLE_ATTEMPT.with(|slot| slot.replace(hook))
}

/// Install the hook run whenever a deferred is rejected. Returns the
/// previously installed hook.
pub fn set_on_reject(hook: Option<RejectHook>) -> Option<RejectHook> {
    ON_REJECT.with(|slot| slot.replace(hook))
}

pub(crate) fn settle_attempt(id: DeferredId) {
    let hook = ON_SETTLE_ATTEMPT.with(|slot| slot.borrow().clone());
    if let Some(hook) = hook {
        hook(id);
    }
}

pub(crate) fn reject(id: DeferredId, reason: &dyn Debug) {
    let hook = ON_REJECT.with(|slot| slot.borrow().clone());
    if let Some(hook) = hook {
        hook(id, reason);
    }
}

#[cfg(test)]
mod tests {
    use deferred::{
        scheduler, Capability, ChannelScheduler, Deferred, DeferredState, Error, Fulfill, Reject,
        Resolution, Thenable,
    };
    use futures::executor::block_on;
    use std::{cell::Cell, rc::Rc};

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    enum AppError {
        #[error("app: {0}")]
        App(&'static str),
        #[error(transparent)]
        Deferred(#[from] Error),
    }

    struct Five;

    impl Thenable<i32, Error> for Five {
        fn then_capability(&self) -> Result<Capability<i32, Error>, Error> {
            Ok(Capability::Then(Box::new(|res: Fulfill<i32, Error>, _rej: Reject<i32, Error>| {
                res.call(5);
                Ok(())
            })))
        }
    }

    #[test]
    fn chaining_increments_a_fulfilled_value() {
        let d: Deferred<i32> = Deferred::new(|fulfill, _| {
            fulfill.call(42);
            Ok(())
        });
        let next = d.then(|v| Ok(Resolution::Value(v + 1)));
        scheduler::run_microtasks();
        assert_eq!(next.state(), DeferredState::Fulfilled(43));
    }

    #[test]
    fn adopted_rejection_reaches_the_outer_deferred() {
        let mut slot = None;
        let inner: Deferred<i32> = Deferred::new(|_, reject| {
            slot = Some(reject);
            Ok(())
        });
        let outer: Deferred<i32> = Deferred::new(|fulfill, _| {
            fulfill.resolve(inner.clone().into());
            Ok(())
        });
        let observed = outer.chain(None, None);
        assert!(outer.is_pending());

        slot.expect("executor runs synchronously").call(Error::from("boom"));
        scheduler::run_microtasks();
        assert_eq!(outer.state(), DeferredState::Rejected(Error::from("boom")));
        assert_eq!(observed.state(), DeferredState::Rejected(Error::from("boom")));
    }

    #[test]
    fn executor_error_becomes_a_rejection() {
        let d: Deferred<i32> = Deferred::new(|_, _| Err(Error::from("x")));
        assert_eq!(d.state(), DeferredState::Rejected(Error::from("x")));
    }

    #[test]
    fn chain_without_handlers_passes_the_value_through() {
        let d: Deferred<i32> = Deferred::fulfilled(7);
        let next = d.chain(None, None);
        scheduler::run_microtasks();
        assert_eq!(next.state(), DeferredState::Fulfilled(7));
    }

    #[test]
    fn handler_returning_a_foreign_thenable_is_adopted() {
        let d: Deferred<i32> = Deferred::fulfilled(0);
        let next = d.then(|_| Ok(Resolution::thenable(Five)));
        scheduler::run_microtasks();
        assert_eq!(next.state(), DeferredState::Fulfilled(5));
    }

    #[test]
    fn only_the_first_fulfillment_is_observed() {
        let d: Deferred<&str> = Deferred::new(|fulfill, _| {
            fulfill.call("first");
            fulfill.call("second");
            Ok(())
        });
        let a = d.then(|v| Ok(Resolution::Value(v)));
        let b = d.then(|v| Ok(Resolution::Value(v)));
        scheduler::run_microtasks();
        assert_eq!(a.state(), DeferredState::Fulfilled("first"));
        assert_eq!(b.state(), DeferredState::Fulfilled("first"));
    }

    #[test]
    fn handlers_are_not_invoked_during_the_settling_call() {
        let settling = Rc::new(Cell::new(false));
        let ran_while_settling = Rc::new(Cell::new(false));
        let (s, r) = (settling.clone(), ran_while_settling.clone());

        let mut slot = None;
        let d: Deferred<i32> = Deferred::new(|fulfill, _| {
            slot = Some(fulfill);
            Ok(())
        });
        let _next = d.then(move |v| {
            r.set(s.get());
            Ok(Resolution::Value(v))
        });

        settling.set(true);
        slot.expect("executor runs synchronously").call(1);
        settling.set(false);

        scheduler::run_microtasks();
        assert!(!ran_while_settling.get());
    }

    #[test]
    fn custom_reason_types_carry_self_resolution() {
        let mut slot = None;
        let d: Deferred<i32, AppError> = Deferred::new(|fulfill, _| {
            slot = Some(fulfill);
            Ok(())
        });
        slot.expect("executor runs synchronously").resolve(d.clone().into());
        let recovered = d.catch(|reason| match reason {
            AppError::Deferred(Error::SelfResolution) => Ok(Resolution::Value(-1)),
            other => Err(other),
        });
        scheduler::run_microtasks();
        assert_eq!(d.state(), DeferredState::Rejected(AppError::Deferred(Error::SelfResolution)));
        assert_eq!(recovered.state(), DeferredState::Fulfilled(-1));
    }

    #[test]
    fn custom_reasons_are_stored_verbatim() {
        let d: Deferred<i32, AppError> = Deferred::rejected(AppError::App("nope"));
        let typed = d.then(|v| Ok(Resolution::Value(v.to_string())));
        scheduler::run_microtasks();
        assert_eq!(block_on(typed.settled()), Err(AppError::App("nope")));
    }

    #[test]
    fn channel_scheduler_drives_a_chain() {
        let (scheduler, drain) = ChannelScheduler::new();
        let d: Deferred<i32> = Deferred::with_scheduler(Rc::new(scheduler), |fulfill, _| {
            fulfill.call(1);
            Ok(())
        });
        let end = d
            .then(|v| Ok(Resolution::Value(v + 1)))
            .then(|v| Ok(Resolution::Value(v * 3)));
        assert!(end.is_pending());
        assert_eq!(drain.run_until_idle(), 2);
        assert_eq!(end.state(), DeferredState::Fulfilled(6));
    }
}

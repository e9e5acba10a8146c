//! Schedulers deliver continuation dispatches on a later turn.
//!
//! A scheduler must run tasks first-in-first-out, one at a time, and must
//! never run a task from inside the `schedule` call that queued it.
//!
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::Rc,
    sync::mpsc::{channel, Receiver, Sender, TryRecvError},
};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Queue `task` to run after the caller has returned.
    fn schedule(&self, task: Task);
}

/// Single-threaded FIFO microtask queue. Clones share the same queue.
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_once(&self) -> bool {
        // The borrow must end before the task runs: tasks schedule more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks queued while
    /// draining. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        tracing::trace!(ran, "microtask queue idle");
        ran
    }
}

impl Scheduler for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// A scheduler backed by a channel. The producing half can be cloned and
/// handed to any number of deferreds; the single [`TaskDrain`] runs the work.
///
/// # Examples
///
/// ```
/// use deferred::{ChannelScheduler, Scheduler};
/// use std::{cell::Cell, rc::Rc};
///
/// let (scheduler, drain) = ChannelScheduler::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// scheduler.schedule(Box::new(move || flag.set(true)));
/// assert!(!ran.get());
/// assert_eq!(drain.run_until_idle(), 1);
/// assert!(ran.get());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    sender: Sender<Task>,
}

#[derive(Debug)]
pub struct TaskDrain {
    receiver: Receiver<Task>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, TaskDrain) {
        let (tx, rx) = channel();
        (ChannelScheduler { sender: tx }, TaskDrain { receiver: rx })
    }
}

impl Scheduler for ChannelScheduler {
    fn schedule(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::warn!("task drain dropped, discarding scheduled task");
        }
    }
}

impl TaskDrain {
    /// Run the oldest queued task. Returns `false` if nothing was queued.
    pub fn run_once(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }
}

thread_local! {
    static CURRENT: MicrotaskQueue = MicrotaskQueue::new();
}

/// The calling thread's default queue, used by [`Deferred::new`](crate::Deferred::new).
pub fn current() -> MicrotaskQueue {
    CURRENT.with(MicrotaskQueue::clone)
}

/// Drain the calling thread's default queue.
pub fn run_microtasks() -> usize {
    current().run_until_idle()
}

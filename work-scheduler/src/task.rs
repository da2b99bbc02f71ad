//! A unit of work that can run on any pool worker.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::micronow;

/// Scheduling class of a task.
///
/// - `Fifo` is general work, served in submission order.
/// - `Lifo` is tile work of normal priority, served *newest first*: a more
///   recent tile request is almost always more relevant to the user.
/// - `LifoLow` is the same but lower priority, used for tiles the frontend
///   marked as off-screen or otherwise less urgent.
///
/// Tasks in the two LIFO classes can be [expedited](crate::WorkPool::expedite)
/// while they sit in the queue, which bumps their enqueue time to "now" and
/// moves them to the front of their class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScheduleClass {
    Fifo,
    Lifo,
    LifoLow,
}

/// Ownership states for a task, see [`WorkPool::relinquish`](crate::WorkPool::relinquish).
pub(crate) const OWN_POOL: u8 = 0;
pub(crate) const OWN_EXTERNAL: u8 = 1;
pub(crate) const OWN_DONE: u8 = 2;

/// Sentinel for "not currently in a heap".
pub(crate) const NO_HEAP: i32 = -1;

pub(crate) struct Task {
    pub(crate) class: ScheduleClass,

    /// Time the task was (last) enqueued, in pool microseconds. Bumped by
    /// expedite; orders the LIFO heaps.
    pub(crate) enqueue_time: AtomicI64,

    /// Number of unfinished prerequisites. Starts at 1 so that a task cannot
    /// run before it is officially enqueued: the enqueue call itself
    /// contributes the final decrement.
    pub(crate) prereq_cnt: AtomicI32,

    pub(crate) status: AtomicU8,

    /// Index into this task's class heap. Only read or written while the
    /// pool's scheduler lock is held; `NO_HEAP` when dequeued or never
    /// heap-resident.
    pub(crate) heap_idx: AtomicI32,

    /// Optional task for which this task is a prerequisite.
    pub(crate) dep: Option<Arc<Task>>,

    pub(crate) body: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Task {
    pub(crate) fn time(&self) -> i64 {
        self.enqueue_time.load(Ordering::Relaxed)
    }
}

/// Shared handle to a task.
///
/// Handles are cheap to clone. A handle held outside the pool is what makes
/// [`WorkPool::expedite`](crate::WorkPool::expedite) safe: the pool and the
/// owner race on the ownership status, never on the task memory itself.
#[derive(Clone)]
pub struct TaskHandle(pub(crate) Arc<Task>);

impl TaskHandle {
    /// Creates a task with no prerequisites.
    pub fn new<F>(class: ScheduleClass, f: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(class, None, f)
    }

    /// Creates a task that is a prerequisite of `dep`: `dep` will not become
    /// runnable until this task (and every other prerequisite) completes.
    ///
    /// `dep` must not have been enqueued yet.
    pub fn with_dep<F>(class: ScheduleClass, dep: &TaskHandle, f: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(class, Some(dep.0.clone()), f)
    }

    fn build<F>(class: ScheduleClass, dep: Option<Arc<Task>>, f: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(d) = &dep {
            d.prereq_cnt.fetch_add(1, Ordering::AcqRel);
        }
        TaskHandle(Arc::new(Task {
            class,
            enqueue_time: AtomicI64::new(micronow()),
            prereq_cnt: AtomicI32::new(1),
            status: AtomicU8::new(OWN_EXTERNAL),
            heap_idx: AtomicI32::new(NO_HEAP),
            dep,
            body: Mutex::new(Some(Box::new(f))),
        }))
    }

    /// True once the task body has run.
    pub fn is_done(&self) -> bool {
        self.0.status.load(Ordering::Acquire) == OWN_DONE
    }

    pub fn class(&self) -> ScheduleClass {
        self.0.class
    }

    #[cfg(test)]
    pub(crate) fn set_time(&self, t: i64) {
        self.0.enqueue_time.store(t, Ordering::Relaxed);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("class", &self.0.class)
            .field("enqueue_time", &self.0.time())
            .field("done", &self.is_done())
            .finish()
    }
}

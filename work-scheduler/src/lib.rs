//! Three-class priority work pool.
//!
//! The pool runs tasks on a fixed set of worker threads. Tasks come in three
//! scheduling classes (see [`ScheduleClass`]): general FIFO work, and two
//! LIFO classes for tile work where the *most recently requested* item should
//! win. Each dequeue picks a class by weighted draw:
//!
//! - 80% — the FIFO queue;
//! - 17% — the newest task from the normal LIFO heap (falling back to the
//!   low heap when the normal one is empty);
//! - 3% — the *oldest* pending LIFO task of either class, which bounds how
//!   long a stale tile task can starve.
//!
//! Tasks carry an optional dependent and an atomic prerequisite count, so a
//! fan-in graph ("run the launcher after every intersect batch") needs no
//! extra machinery: every completing task decrements its dependent's count
//! and enqueues it on reaching zero.
//!
//! A task already sitting in a LIFO heap can be [expedited](WorkPool::expedite):
//! its enqueue time is bumped to now and it sifts to the top of its heap.
//! This is how a duplicate tile request speeds up work that is already
//! queued instead of enqueueing more of it.

mod clock;
mod task;

pub use clock::micronow;
pub use task::{ScheduleClass, TaskHandle};

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use task::{Task, NO_HEAP, OWN_DONE, OWN_EXTERNAL, OWN_POOL};

/// Max-heap of tasks keyed by enqueue time, with per-task index tracking so
/// an arbitrary element can be removed or sifted up after an expedite.
///
/// All methods must be called with the scheduler lock held; `heap_idx` uses
/// relaxed atomics purely because `Task` is shared, not for synchronization.
#[derive(Default)]
struct TimeHeap {
    slots: Vec<Arc<Task>>,
}

impl TimeHeap {
    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, t: Arc<Task>) {
        let idx = self.slots.len();
        t.heap_idx.store(idx as i32, Ordering::Relaxed);
        self.slots.push(t);
        self.sift_up(idx);
    }

    #[cfg(test)]
    fn peek_is_root(&self, t: &Arc<Task>) -> bool {
        !self.slots.is_empty() && t.heap_idx.load(Ordering::Relaxed) == 0
    }

    /// Removes and returns the newest task.
    fn pop(&mut self) -> Arc<Task> {
        self.remove_at(0)
    }

    /// Removes a specific task, wherever it sits.
    fn remove(&mut self, t: &Arc<Task>) {
        let idx = t.heap_idx.load(Ordering::Relaxed);
        assert!(idx != NO_HEAP, "task not in heap");
        self.remove_at(idx as usize);
    }

    fn remove_at(&mut self, idx: usize) -> Arc<Task> {
        let removed = self.slots.swap_remove(idx);
        removed.heap_idx.store(NO_HEAP, Ordering::Relaxed);
        if idx < self.slots.len() {
            self.slots[idx].heap_idx.store(idx as i32, Ordering::Relaxed);
            // The element swapped in may belong further up or further down.
            let idx = self.sift_up(idx);
            self.sift_down(idx);
        }
        removed
    }

    /// Bumps `t`'s key to `now` and restores heap order. No-op if the task
    /// already left the heap.
    fn update(&mut self, t: &Arc<Task>, now: i64) {
        let idx = t.heap_idx.load(Ordering::Relaxed);
        if idx == NO_HEAP {
            return;
        }
        if t.time() < now {
            t.enqueue_time.store(now, Ordering::Relaxed);
        }
        self.sift_up(idx as usize);
    }

    fn sift_up(&mut self, mut idx: usize) -> usize {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.slots[parent].time() >= self.slots[idx].time() {
                break;
            }
            self.swap(parent, idx);
            idx = parent;
        }
        idx
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let mut child = 2 * idx + 1;
            if child >= self.slots.len() {
                break;
            }
            if child + 1 < self.slots.len()
                && self.slots[child + 1].time() > self.slots[child].time()
            {
                child += 1;
            }
            if self.slots[child].time() <= self.slots[idx].time() {
                break;
            }
            self.swap(idx, child);
            idx = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a, b);
        self.slots[a].heap_idx.store(a as i32, Ordering::Relaxed);
        self.slots[b].heap_idx.store(b as i32, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct Sched {
    fifo: VecDeque<Arc<Task>>,
    lifo_heap: TimeHeap,
    lifo_low_heap: TimeHeap,
    /// Both LIFO classes in arrival order, for the anti-starvation slot.
    /// Entries are skipped lazily once a heap pop already consumed them.
    lifo_arrivals: VecDeque<Arc<Task>>,
    shutdown: bool,
}

impl Sched {
    fn has_lifo(&self) -> bool {
        !self.lifo_heap.is_empty() || !self.lifo_low_heap.is_empty()
    }

    fn has_work(&self) -> bool {
        !self.fifo.is_empty() || self.has_lifo()
    }
}

/// Which queue a dequeue draw landed on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Slot {
    Fifo,
    LifoNewest,
    LifoOldest,
}

/// Weighted class choice. `r` is a uniform draw in `[0, 100)`.
fn pick_slot(r: u32, has_fifo: bool, has_lifo: bool) -> Slot {
    let w_fifo = if has_fifo { 80 } else { 0 };
    let w_new = if has_lifo { 17 } else { 0 };
    let w_old = if has_lifo { 3 } else { 0 };
    let sum = w_fifo + w_new + w_old;
    assert!(sum > 0, "pick_slot called with no runnable work");

    let r = r % sum;
    if r < w_fifo {
        Slot::Fifo
    } else if r < w_fifo + w_new {
        Slot::LifoNewest
    } else {
        Slot::LifoOldest
    }
}

/// Pops a task from the chosen slot. The scheduler lock must be held and the
/// slot must be non-empty per the `pick_slot` inputs.
fn take(s: &mut Sched, slot: Slot) -> Arc<Task> {
    match slot {
        Slot::Fifo => s.fifo.pop_front().expect("fifo queue empty"),
        Slot::LifoNewest => {
            // The arrival-list entry for this task goes stale and is
            // skipped by the LifoOldest path.
            if !s.lifo_heap.is_empty() {
                s.lifo_heap.pop()
            } else {
                s.lifo_low_heap.pop()
            }
        }
        Slot::LifoOldest => loop {
            let t = s.lifo_arrivals.pop_front().expect("arrival list empty");
            if t.heap_idx.load(Ordering::Relaxed) == NO_HEAP {
                continue; // Already taken via a heap.
            }
            match t.class {
                ScheduleClass::Lifo => s.lifo_heap.remove(&t),
                ScheduleClass::LifoLow => s.lifo_low_heap.remove(&t),
                ScheduleClass::Fifo => unreachable!(),
            }
            return t;
        },
    }
}

/// State shared between the pool handle and its workers.
struct PoolInner {
    sched: Mutex<Sched>,
    cv: Condvar,
}

impl PoolInner {
    fn push_ready(&self, t: Arc<Task>) {
        {
            let mut s = self.sched.lock().unwrap();
            t.enqueue_time.store(micronow(), Ordering::Relaxed);
            match t.class {
                ScheduleClass::Fifo => s.fifo.push_back(t),
                ScheduleClass::Lifo => {
                    s.lifo_arrivals.push_back(t.clone());
                    s.lifo_heap.push(t);
                }
                ScheduleClass::LifoLow => {
                    s.lifo_arrivals.push_back(t.clone());
                    s.lifo_low_heap.push(t);
                }
            }
        }
        self.cv.notify_one();
    }

    fn enqueue_decrement(&self, t: &Arc<Task>) {
        let left = t.prereq_cnt.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(left >= 0, "task enqueued twice");
        if left == 0 {
            self.push_ready(t.clone());
        }
        // Otherwise the last completing prerequisite pushes it.
    }

    fn dequeue(&self, rng: &mut SmallRng) -> Option<Arc<Task>> {
        let mut s = self.sched.lock().unwrap();
        loop {
            if s.shutdown {
                return None;
            }
            if s.has_work() {
                break;
            }
            s = self.cv.wait(s).unwrap();
        }

        let slot = pick_slot(rng.gen_range(0..100u32), !s.fifo.is_empty(), s.has_lifo());
        Some(take(&mut s, slot))
    }

    fn run_task(&self, t: Arc<Task>) {
        trace!("running task (wait time = {} us)", micronow() - t.time());
        let body = t.body.lock().unwrap().take();
        if let Some(f) = body {
            f();
        }

        let prev = t.status.swap(OWN_DONE, Ordering::AcqRel);
        debug_assert!(prev == OWN_POOL || prev == OWN_EXTERNAL);

        if let Some(dep) = &t.dep {
            let left = dep.prereq_cnt.fetch_sub(1, Ordering::AcqRel) - 1;
            trace!("dependent has {left} prerequisites left");
            if left == 0 {
                self.push_ready(dep.clone());
            }
        }
    }

    fn worker_loop(self: Arc<Self>, idx: usize) {
        debug!("worker #{idx} started");
        let mut rng = SmallRng::seed_from_u64(idx as u64 + 1);
        while let Some(task) = self.dequeue(&mut rng) {
            self.run_task(task);
        }
        debug!("worker #{idx} shutting down");
    }
}

/// Fixed-size pool of worker threads.
///
/// Dropping the pool shuts it down: workers finish their current task and
/// exit; queued tasks are discarded.
pub struct WorkPool {
    inner: Arc<PoolInner>,
    nthreads: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkPool {
    /// Spawns `nthreads` named workers.
    pub fn new(nthreads: usize) -> Arc<WorkPool> {
        assert!(nthreads > 0);
        let inner = Arc::new(PoolInner {
            sched: Mutex::new(Sched::default()),
            cv: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(nthreads);
        for idx in 0..nthreads {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("plotflow-worker-{idx}"))
                .spawn(move || inner.worker_loop(idx))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Arc::new(WorkPool {
            inner,
            nthreads,
            workers: Mutex::new(workers),
        })
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Enqueues a task and transfers ownership to the pool: nobody is
    /// expected to hold a handle to it afterwards.
    ///
    /// If the task still has unfinished prerequisites it is not made
    /// runnable yet; the last completing prerequisite does that.
    pub fn enqueue(&self, t: &TaskHandle) {
        t.0.status.store(OWN_POOL, Ordering::Release);
        self.inner.enqueue_decrement(&t.0);
    }

    /// Enqueues a task while the caller keeps ownership of the handle, which
    /// stays valid for [`expedite`](Self::expedite). Pass the handle to
    /// [`relinquish`](Self::relinquish) once the caller no longer cares.
    pub fn enqueue_shared(&self, t: &TaskHandle) {
        debug_assert_eq!(t.0.status.load(Ordering::Relaxed), OWN_EXTERNAL);
        self.inner.enqueue_decrement(&t.0);
    }

    /// Moves an in-queue LIFO task to the front of its class. Silent no-op
    /// if the task was already dequeued or has completed.
    pub fn expedite(&self, t: &TaskHandle) {
        let mut s = self.inner.sched.lock().unwrap();
        if t.0.heap_idx.load(Ordering::Relaxed) == NO_HEAP {
            return;
        }
        let now = micronow();
        match t.0.class {
            ScheduleClass::Lifo => s.lifo_heap.update(&t.0, now),
            ScheduleClass::LifoLow => s.lifo_low_heap.update(&t.0, now),
            ScheduleClass::Fifo => panic!("cannot expedite a FIFO task"),
        }
        trace!("expedited task to t={now}");
    }

    /// Hands a previously [`enqueue_shared`](Self::enqueue_shared) task over
    /// to the pool. If the task has already run the handle is simply
    /// dropped; otherwise the pool takes ownership and runs it as usual.
    pub fn relinquish(&self, t: TaskHandle) {
        let _ = t.0.status.compare_exchange(
            OWN_EXTERNAL,
            OWN_POOL,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // On failure the status is OWN_DONE and dropping the handle frees it.
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.inner.sched.lock().unwrap().shutdown = true;
        self.inner.cv.notify_all();
        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(class: ScheduleClass) -> TaskHandle {
        TaskHandle::new(class, || {})
    }

    #[test]
    fn pick_slot_weights() {
        for r in 0..100 {
            assert_eq!(pick_slot(r, true, false), Slot::Fifo);
        }
        for r in 0..80 {
            assert_eq!(pick_slot(r, true, true), Slot::Fifo);
        }
        for r in 80..97 {
            assert_eq!(pick_slot(r, true, true), Slot::LifoNewest);
        }
        for r in 97..100 {
            assert_eq!(pick_slot(r, true, true), Slot::LifoOldest);
        }
        for r in 0..85 {
            assert_eq!(pick_slot(r, false, true), Slot::LifoNewest);
        }
        for r in 85..100 {
            assert_eq!(pick_slot(r, false, true), Slot::LifoOldest);
        }
    }

    #[test]
    fn heap_orders_by_time_descending() {
        let mut heap = TimeHeap::default();
        let times = [50, 10, 80, 30, 70, 20, 60];
        let tasks: Vec<_> = times
            .iter()
            .map(|&t| {
                let h = dummy(ScheduleClass::Lifo);
                h.set_time(t);
                heap.push(h.0.clone());
                h
            })
            .collect();

        let mut popped = Vec::new();
        while !heap.is_empty() {
            popped.push(heap.pop().time());
        }
        let mut expected = times.to_vec();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(popped, expected);
        drop(tasks);
    }

    #[test]
    fn heap_update_moves_to_root() {
        let mut heap = TimeHeap::default();
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let h = dummy(ScheduleClass::Lifo);
                h.set_time(i * 10);
                heap.push(h.0.clone());
                h
            })
            .collect();

        heap.update(&tasks[2].0, 1000);
        assert!(heap.peek_is_root(&tasks[2].0));
        assert_eq!(heap.pop().time(), 1000);
    }

    #[test]
    fn heap_remove_middle_keeps_order() {
        let mut heap = TimeHeap::default();
        let tasks: Vec<_> = [40, 90, 10, 60, 30, 70]
            .iter()
            .map(|&t| {
                let h = dummy(ScheduleClass::Lifo);
                h.set_time(t);
                heap.push(h.0.clone());
                h
            })
            .collect();

        heap.remove(&tasks[3].0); // t = 60
        let mut popped = Vec::new();
        while !heap.is_empty() {
            popped.push(heap.pop().time());
        }
        assert_eq!(popped, vec![90, 70, 40, 30, 10]);
    }

    #[test]
    fn oldest_slot_skips_tasks_already_taken() {
        let mut s = Sched::default();
        let a = dummy(ScheduleClass::Lifo);
        let b = dummy(ScheduleClass::LifoLow);
        a.set_time(10);
        b.set_time(20);
        s.lifo_arrivals.push_back(a.0.clone());
        s.lifo_heap.push(a.0.clone());
        s.lifo_arrivals.push_back(b.0.clone());
        s.lifo_low_heap.push(b.0.clone());

        // Newest slot takes `a` (the normal heap wins over the low one).
        let got = take(&mut s, Slot::LifoNewest);
        assert!(Arc::ptr_eq(&got, &a.0));

        // Oldest slot must skip the stale arrival entry for `a`.
        let got = take(&mut s, Slot::LifoOldest);
        assert!(Arc::ptr_eq(&got, &b.0));
        assert!(!s.has_lifo());
    }
}

//! The virtual-time executor.
//!
//! Single-threaded and cooperative: many tasks are logically concurrent but
//! exactly one runs between suspension points, so shared simulation state
//! needs no locking. The run loop alternates between draining the FIFO
//! ready queue and advancing the clock to the next timer deadline. Timers
//! are ordered by `(deadline, sequence)`; the sequence tie-break makes
//! same-instant events fire in scheduling order, which is what makes a run
//! reproducible for identical inputs and seeds.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::clock::SimTime;
use crate::error::{KernelResult, SimAbort};

type TaskId = u64;
type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

/// A suspended top-level continuation.
struct Task {
    label: String,
    future: TaskFuture,
}

/// Wake-up requests recorded by [`Waker`]s.
///
/// The executor is single-threaded, but the `Waker` contract requires
/// `Send + Sync`, so the wake list sits behind an (uncontended) mutex.
type WakeList = Arc<Mutex<VecDeque<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    woken: WakeList,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.woken.lock().expect("wake list poisoned").push_back(self.id);
    }
}

/// Shared state of one pending timer.
pub(crate) struct TimerState {
    fired: bool,
    waker: Option<Waker>,
}

/// Heap entry: min-ordered by `(deadline, seq)`.
struct TimerEntry {
    deadline: SimTime,
    seq: u64,
    state: Rc<RefCell<TimerState>>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for earliest-first.
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

struct KernelInner {
    now: Cell<SimTime>,
    next_task_id: Cell<TaskId>,
    next_seq: Cell<u64>,
    tasks: RefCell<HashMap<TaskId, Task>>,
    ready: RefCell<VecDeque<TaskId>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    woken: WakeList,
}

/// Handle to the simulation kernel. Cheap to clone; one kernel per run.
#[derive(Clone)]
pub struct Kernel {
    inner: Rc<KernelInner>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Create a fresh kernel with the clock at zero.
    pub fn new() -> Self {
        Kernel {
            inner: Rc::new(KernelInner {
                now: Cell::new(SimTime::ZERO),
                next_task_id: Cell::new(0),
                next_seq: Cell::new(0),
                tasks: RefCell::new(HashMap::new()),
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
                woken: Arc::new(Mutex::new(VecDeque::new())),
            }),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.inner.now.get()
    }

    /// Schedule a task to begin running immediately — before any work
    /// scheduled at a later virtual time.
    ///
    /// An `Err` escaping the task aborts the whole run with a [`SimAbort`];
    /// simulated-domain failures must be handled inside the task.
    pub fn spawn<F>(&self, label: impl Into<String>, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let id = self.inner.next_task_id.get();
        self.inner.next_task_id.set(id + 1);
        self.inner.tasks.borrow_mut().insert(
            id,
            Task {
                label: label.into(),
                future: Box::pin(future),
            },
        );
        self.inner.ready.borrow_mut().push_back(id);
    }

    /// An awaitable that fires once `duration` of virtual time has passed.
    ///
    /// A zero duration still suspends once, keeping FIFO order among
    /// same-time events.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let deadline = self.now() + duration;
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let state = Rc::new(RefCell::new(TimerState {
            fired: false,
            waker: None,
        }));
        self.inner.timers.borrow_mut().push(TimerEntry {
            deadline,
            seq,
            state: Rc::clone(&state),
        });
        Sleep { state }
    }

    /// Run all due work until `deadline`, leaving the clock there.
    ///
    /// Events execute in `(time, insertion-order)` order. Returns the fatal
    /// diagnostic if an error escapes a top-level task.
    pub fn run_until(&self, deadline: SimTime) -> KernelResult<()> {
        loop {
            self.drain_ready()?;
            let next = self.next_timer_deadline();
            match next {
                Some(due) if due <= deadline => {
                    if due > self.now() {
                        self.inner.now.set(due);
                    }
                    self.fire_due_timers();
                }
                _ => {
                    if deadline > self.now() {
                        self.inner.now.set(deadline);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Run until no timers or runnable tasks remain.
    ///
    /// Tasks parked on promises that will never settle do not count as
    /// runnable. Never terminates while periodic tasks keep re-arming
    /// timers — scenario runs should use a bounded [`Kernel::run_until`].
    pub fn run_until_idle(&self) -> KernelResult<()> {
        loop {
            self.drain_ready()?;
            let Some(due) = self.next_timer_deadline() else {
                return Ok(());
            };
            if due > self.now() {
                self.inner.now.set(due);
            }
            self.fire_due_timers();
        }
    }

    // ── Internal ────────────────────────────────────────────────────

    fn next_timer_deadline(&self) -> Option<SimTime> {
        self.inner.timers.borrow().peek().map(|t| t.deadline)
    }

    /// Pop and fire every timer due at or before the current time.
    fn fire_due_timers(&self) {
        let now = self.now();
        loop {
            let entry = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.peek() {
                    Some(t) if t.deadline <= now => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else { break };
            let mut state = entry.state.borrow_mut();
            state.fired = true;
            if let Some(waker) = state.waker.take() {
                waker.wake();
            }
        }
    }

    /// Poll runnable tasks until the ready and wake lists are both empty.
    fn drain_ready(&self) -> KernelResult<()> {
        loop {
            {
                let mut woken = self.inner.woken.lock().expect("wake list poisoned");
                let mut ready = self.inner.ready.borrow_mut();
                ready.extend(woken.drain(..));
            }
            let id = self.inner.ready.borrow_mut().pop_front();
            let Some(id) = id else {
                if self.inner.woken.lock().expect("wake list poisoned").is_empty() {
                    return Ok(());
                }
                continue;
            };
            // Take the task out of the table so the poll can re-enter the
            // kernel (spawn, sleep, wake) without holding a borrow.
            let Some(mut task) = self.inner.tasks.borrow_mut().remove(&id) else {
                continue; // already completed; stale wake
            };
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                woken: Arc::clone(&self.inner.woken),
            }));
            let mut cx = Context::from_waker(&waker);
            match task.future.as_mut().poll(&mut cx) {
                Poll::Ready(Ok(())) => {
                    tracing::trace!(task = %task.label, at = %self.now(), "task completed");
                }
                Poll::Ready(Err(source)) => {
                    return Err(SimAbort {
                        task: task.label,
                        at: self.now(),
                        source,
                    });
                }
                Poll::Pending => {
                    self.inner.tasks.borrow_mut().insert(id, task);
                }
            }
        }
    }
}

/// Timer future returned by [`Kernel::sleep`].
pub struct Sleep {
    state: Rc<RefCell<TimerState>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.fired {
            Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

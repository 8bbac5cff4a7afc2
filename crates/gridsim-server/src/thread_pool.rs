//! The instance's concurrency core: a fixed-capacity thread pool plus the
//! utilization sampling that feeds the autoscaler.
//!
//! Two counters coexist on purpose: the semaphore bounds how many handler
//! tasks run at once, while `active` counts threads inside a compute
//! section — that is the number the contention model and the cpu_usage
//! gauge look at.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use gridsim_core::SimContext;
use gridsim_kernel::{race_signal, Acquire, Semaphore, Signal};

/// Samples kept in the rolling active-thread history.
const SAMPLE_HISTORY: usize = 20;
/// Samples averaged for the cpu_usage gauge.
const USAGE_WINDOW: usize = 10;
/// Sampling cadence.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-capacity thread pool with a rolling utilization history.
pub struct ThreadPool {
    threads: Semaphore,
    active: Cell<usize>,
    samples: RefCell<VecDeque<usize>>,
}

impl ThreadPool {
    /// Create the pool and start its sampling loop, which runs until the
    /// owning instance's alive signal fires.
    pub fn new(ctx: &SimContext, threads: usize, alive: &Signal) -> Rc<Self> {
        let pool = Rc::new(ThreadPool {
            threads: Semaphore::new(threads),
            active: Cell::new(0),
            samples: RefCell::new(VecDeque::new()),
        });

        let sampler = Rc::clone(&pool);
        let kernel = ctx.kernel();
        let alive = alive.clone();
        ctx.kernel().spawn("thread_pool.sampler", async move {
            while !alive.fired() {
                if race_signal(&alive, kernel.sleep(SAMPLE_INTERVAL)).await.is_none() {
                    break;
                }
                let mut samples = sampler.samples.borrow_mut();
                samples.push_back(sampler.active.get());
                while samples.len() > SAMPLE_HISTORY {
                    samples.pop_front();
                }
            }
            Ok(())
        });

        pool
    }

    /// Acquire one thread slot, suspending FIFO when all are busy.
    pub fn acquire(&self) -> Acquire {
        self.threads.acquire()
    }

    /// Total thread capacity.
    pub fn capacity(&self) -> usize {
        self.threads.capacity()
    }

    /// Threads currently inside a compute section.
    pub fn active_threads(&self) -> usize {
        self.active.get()
    }

    /// Enter a compute section; the guard leaves it on drop, no matter how
    /// the computation ends.
    pub fn begin_compute(self: &Rc<Self>) -> ComputeGuard {
        self.active.set(self.active.get() + 1);
        ComputeGuard {
            pool: Rc::clone(self),
        }
    }

    /// Mean of the recent active-thread samples, each capped at
    /// `cpu_quota`. Zero until the first sample lands.
    pub fn cpu_usage(&self, cpu_quota: f64) -> f64 {
        let samples = self.samples.borrow();
        if samples.is_empty() {
            return 0.0;
        }
        let window: Vec<f64> = samples
            .iter()
            .rev()
            .take(USAGE_WINDOW)
            .map(|&n| (n as f64).min(cpu_quota))
            .collect();
        window.iter().sum::<f64>() / window.len() as f64
    }
}

/// RAII marker for one thread inside a compute section.
pub struct ComputeGuard {
    pool: Rc<ThreadPool>,
}

impl Drop for ComputeGuard {
    fn drop(&mut self) {
        let active = self.pool.active.get();
        debug_assert!(active > 0, "compute guard dropped with no active threads");
        self.pool.active.set(active.saturating_sub(1));
    }
}

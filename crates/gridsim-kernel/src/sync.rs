//! Cooperative synchronization primitives.
//!
//! Everything here is cancellation-safe under the kernel's uniform idiom:
//! an operation raced against a terminal [`Signal`] may be dropped at any
//! suspension point, and any resource it held is returned on drop — a
//! [`Permit`] releases its thread slot, a half-finished [`Queue::pop`]
//! puts the item back. No primitive ever propagates an error from an
//! abandoned branch.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

// ── Signal ──────────────────────────────────────────────────────────

struct SignalInner {
    fired: bool,
    wakers: Vec<Waker>,
}

/// A one-shot event. Fires exactly once; waiting after the fire completes
/// immediately. Used as the instance "alive" (terminal) signal.
#[derive(Clone)]
pub struct Signal {
    inner: Rc<RefCell<SignalInner>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            inner: Rc::new(RefCell::new(SignalInner {
                fired: false,
                wakers: Vec::new(),
            })),
        }
    }

    /// Fire the signal, waking all waiters. Idempotent.
    pub fn fire(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.fired {
            return;
        }
        inner.fired = true;
        for waker in inner.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Whether the signal has fired.
    pub fn fired(&self) -> bool {
        self.inner.borrow().fired
    }

    /// Suspend until the signal fires.
    pub fn wait(&self) -> SignalWait {
        SignalWait {
            signal: self.clone(),
        }
    }
}

/// Future returned by [`Signal::wait`].
pub struct SignalWait {
    signal: Signal,
}

impl Future for SignalWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.signal.inner.borrow_mut();
        if inner.fired {
            Poll::Ready(())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

// ── Semaphore ───────────────────────────────────────────────────────

enum SemSlot {
    Waiting(Option<Waker>),
    Granted,
    Cancelled,
}

struct SemaphoreInner {
    available: usize,
    capacity: usize,
    waiters: VecDeque<Rc<RefCell<SemSlot>>>,
}

/// FIFO counting semaphore over virtual time.
///
/// Releases hand the permit directly to the oldest live waiter, so grants
/// happen strictly in arrival order.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<SemaphoreInner>>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Semaphore {
            inner: Rc::new(RefCell::new(SemaphoreInner {
                available: capacity,
                capacity,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.inner.borrow().available
    }

    /// Total permit count.
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Acquire one permit, suspending FIFO if none is free. The permit is
    /// released when the returned [`Permit`] drops.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            semaphore: self.clone(),
            slot: None,
        }
    }

    /// Return one permit: hand off to the oldest live waiter, or restore
    /// the free count.
    fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        while let Some(slot) = inner.waiters.pop_front() {
            let mut state = slot.borrow_mut();
            match &mut *state {
                SemSlot::Cancelled => continue,
                SemSlot::Waiting(waker) => {
                    let waker = waker.take();
                    *state = SemSlot::Granted;
                    drop(state);
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    return;
                }
                SemSlot::Granted => unreachable!("granted slot left in waiter queue"),
            }
        }
        inner.available += 1;
    }
}

/// An acquired semaphore permit; returns itself to the pool on drop.
pub struct Permit {
    semaphore: Semaphore,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Future returned by [`Semaphore::acquire`].
pub struct Acquire {
    semaphore: Semaphore,
    slot: Option<Rc<RefCell<SemSlot>>>,
}

impl Future for Acquire {
    type Output = Permit;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Permit> {
        match self.slot.take() {
            None => {
                let mut inner = self.semaphore.inner.borrow_mut();
                if inner.available > 0 {
                    inner.available -= 1;
                    drop(inner);
                    return Poll::Ready(Permit {
                        semaphore: self.semaphore.clone(),
                    });
                }
                let slot = Rc::new(RefCell::new(SemSlot::Waiting(Some(cx.waker().clone()))));
                inner.waiters.push_back(Rc::clone(&slot));
                drop(inner);
                self.slot = Some(slot);
                Poll::Pending
            }
            Some(slot) => {
                let granted = matches!(*slot.borrow(), SemSlot::Granted);
                if granted {
                    // Slot consumed; drop of this future must not release twice.
                    return Poll::Ready(Permit {
                        semaphore: self.semaphore.clone(),
                    });
                }
                *slot.borrow_mut() = SemSlot::Waiting(Some(cx.waker().clone()));
                self.slot = Some(slot);
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let was_granted = matches!(*slot.borrow(), SemSlot::Granted);
            if was_granted {
                // Granted but never taken: pass the permit along.
                self.semaphore.release();
            } else {
                *slot.borrow_mut() = SemSlot::Cancelled;
            }
        }
    }
}

// ── Queue ───────────────────────────────────────────────────────────

enum GetSlot<T> {
    Waiting(Option<Waker>),
    Delivered(T),
    Cancelled,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    getters: VecDeque<Rc<RefCell<GetSlot<T>>>>,
}

/// Unbounded FIFO queue with an async `pop`.
///
/// Admission bounds are the caller's job: a bounded admission queue checks
/// `len()` against its limit and rejects *before* pushing — over-capacity
/// arrivals are never parked.
pub struct Queue<T> {
    inner: Rc<RefCell<QueueInner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue {
            inner: Rc::new(RefCell::new(QueueInner {
                items: VecDeque::new(),
                getters: VecDeque::new(),
            })),
        }
    }

    /// Append an item, handing it straight to the oldest live getter if
    /// one is parked.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.borrow_mut();
        let mut item = Some(item);
        while let Some(slot) = inner.getters.pop_front() {
            let mut state = slot.borrow_mut();
            match &mut *state {
                GetSlot::Cancelled => continue,
                GetSlot::Waiting(waker) => {
                    let waker = waker.take();
                    *state = GetSlot::Delivered(item.take().expect("item consumed twice"));
                    drop(state);
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    return;
                }
                GetSlot::Delivered(_) => unreachable!("delivered slot left in getter queue"),
            }
        }
        inner.items.push_back(item.take().expect("item consumed twice"));
    }

    /// Remove the oldest item, suspending until one arrives.
    pub fn pop(&self) -> Pop<T> {
        Pop {
            queue: self.clone(),
            slot: None,
        }
    }

    /// Items currently queued (not counting parked getters).
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// Whether a live getter is parked on the queue. A push right now
    /// would hand off directly instead of queueing — bounded admission
    /// checks use this to tell "would queue" from "would be consumed".
    pub fn has_parked_getter(&self) -> bool {
        self.inner
            .borrow()
            .getters
            .iter()
            .any(|slot| matches!(*slot.borrow(), GetSlot::Waiting(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything queued. Used on shutdown to fail
    /// pending work.
    pub fn drain(&self) -> Vec<T> {
        self.inner.borrow_mut().items.drain(..).collect()
    }

    /// Put an item back at the head (a cancelled `pop` undoing its take).
    fn requeue_front(&self, item: T) {
        let mut inner = self.inner.borrow_mut();
        let mut item = Some(item);
        while let Some(slot) = inner.getters.pop_front() {
            let mut state = slot.borrow_mut();
            match &mut *state {
                GetSlot::Cancelled => continue,
                GetSlot::Waiting(waker) => {
                    let waker = waker.take();
                    *state = GetSlot::Delivered(item.take().expect("item consumed twice"));
                    drop(state);
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    return;
                }
                GetSlot::Delivered(_) => unreachable!("delivered slot left in getter queue"),
            }
        }
        inner.items.push_front(item.take().expect("item consumed twice"));
    }
}

/// Future returned by [`Queue::pop`].
pub struct Pop<T> {
    queue: Queue<T>,
    slot: Option<Rc<RefCell<GetSlot<T>>>>,
}

impl<T> Future for Pop<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match self.slot.take() {
            None => {
                let mut inner = self.queue.inner.borrow_mut();
                if let Some(item) = inner.items.pop_front() {
                    return Poll::Ready(item);
                }
                let slot = Rc::new(RefCell::new(GetSlot::Waiting(Some(cx.waker().clone()))));
                inner.getters.push_back(Rc::clone(&slot));
                drop(inner);
                self.slot = Some(slot);
                Poll::Pending
            }
            Some(slot) => {
                let mut state = slot.borrow_mut();
                match std::mem::replace(&mut *state, GetSlot::Cancelled) {
                    GetSlot::Delivered(item) => {
                        drop(state);
                        Poll::Ready(item)
                    }
                    _ => {
                        *state = GetSlot::Waiting(Some(cx.waker().clone()));
                        drop(state);
                        self.slot = Some(slot);
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<T> Drop for Pop<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let mut state = slot.borrow_mut();
            match std::mem::replace(&mut *state, GetSlot::Cancelled) {
                // Delivered but never observed: the item goes back to the head.
                GetSlot::Delivered(item) => {
                    drop(state);
                    self.queue.requeue_front(item);
                }
                _ => {}
            }
        }
    }
}

// ── Races ───────────────────────────────────────────────────────────

/// Outcome of [`race2`].
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

/// Future racing two futures; the loser is dropped (cancelled) when the
/// winner completes. Ties go to the left side.
pub struct Race2<A: Future, B: Future> {
    a: Pin<Box<A>>,
    b: Pin<Box<B>>,
}

/// Race two futures, completing with whichever finishes first.
pub fn race2<A: Future, B: Future>(a: A, b: B) -> Race2<A, B> {
    Race2 {
        a: Box::pin(a),
        b: Box::pin(b),
    }
}

impl<A: Future, B: Future> Future for Race2<A, B> {
    type Output = Either<A::Output, B::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(out) = self.a.as_mut().poll(cx) {
            return Poll::Ready(Either::Left(out));
        }
        if let Poll::Ready(out) = self.b.as_mut().poll(cx) {
            return Poll::Ready(Either::Right(out));
        }
        Poll::Pending
    }
}

/// Race an operation against a terminal signal.
///
/// Returns `None` if the signal fires first (or already had); the abandoned
/// operation is dropped, releasing whatever it held, and its outcome never
/// propagates. If both are ready at the same instant the operation wins.
pub async fn race_signal<F: Future>(signal: &Signal, operation: F) -> Option<F::Output> {
    if signal.fired() {
        return None;
    }
    match race2(operation, signal.wait()).await {
        Either::Left(out) => Some(out),
        Either::Right(()) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimTime;
    use crate::executor::Kernel;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn signal_wakes_waiters_and_stays_fired() {
        let kernel = Kernel::new();
        let signal = Signal::new();
        let seen = Rc::new(Cell::new(false));

        let s = Rc::clone(&seen);
        let sig = signal.clone();
        kernel.spawn("waiter", async move {
            sig.wait().await;
            s.set(true);
            Ok(())
        });
        signal.fire();
        signal.fire(); // idempotent
        kernel.run_until_idle().unwrap();
        assert!(seen.get());
        assert!(signal.fired());
    }

    #[test]
    fn semaphore_limits_concurrency_and_grants_fifo() {
        let kernel = Kernel::new();
        let sem = Semaphore::new(2);
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..4 {
            let k = kernel.clone();
            let sem = sem.clone();
            let order = Rc::clone(&order);
            kernel.spawn(format!("worker-{i}"), async move {
                let _permit = sem.acquire().await;
                order.borrow_mut().push((i, k.now()));
                k.sleep(Duration::from_secs(1)).await;
                Ok(())
            });
        }

        kernel.run_until_idle().unwrap();
        let order = order.borrow();
        // Two run at t=0, the next two at t=1, in arrival order.
        assert_eq!(order[0], (0, SimTime::ZERO));
        assert_eq!(order[1], (1, SimTime::ZERO));
        assert_eq!(order[2], (2, SimTime::from_secs_f64(1.0)));
        assert_eq!(order[3], (3, SimTime::from_secs_f64(1.0)));
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn permit_count_never_exceeds_capacity() {
        let kernel = Kernel::new();
        let sem = Semaphore::new(3);
        let peak = Rc::new(Cell::new(0usize));
        let active = Rc::new(Cell::new(0usize));

        for i in 0..10 {
            let k = kernel.clone();
            let sem = sem.clone();
            let peak = Rc::clone(&peak);
            let active = Rc::clone(&active);
            kernel.spawn(format!("w{i}"), async move {
                let _permit = sem.acquire().await;
                active.set(active.get() + 1);
                peak.set(peak.get().max(active.get()));
                k.sleep(Duration::from_millis(500)).await;
                active.set(active.get() - 1);
                Ok(())
            });
        }

        kernel.run_until_idle().unwrap();
        assert_eq!(peak.get(), 3);
        assert_eq!(sem.available(), 3);
    }

    #[test]
    fn queue_is_fifo_across_parked_getters() {
        let kernel = Kernel::new();
        let queue: Queue<u32> = Queue::new();
        let out = Rc::new(RefCell::new(Vec::new()));

        for i in 0..2 {
            let q = queue.clone();
            let out = Rc::clone(&out);
            kernel.spawn(format!("getter-{i}"), async move {
                let v = q.pop().await;
                out.borrow_mut().push((i, v));
                Ok(())
            });
        }
        let q = queue.clone();
        let k = kernel.clone();
        kernel.spawn("producer", async move {
            k.sleep(Duration::from_secs(1)).await;
            q.push(10);
            q.push(20);
            Ok(())
        });

        kernel.run_until_idle().unwrap();
        assert_eq!(*out.borrow(), vec![(0, 10), (1, 20)]);
    }

    #[test]
    fn cancelled_pop_does_not_swallow_later_items() {
        let kernel = Kernel::new();
        let queue: Queue<u32> = Queue::new();
        let signal = Signal::new();
        let won = Rc::new(Cell::new(None));

        // Parks on the empty queue, then loses the race before anything
        // arrives; the dead getter slot must not eat the later push.
        let q = queue.clone();
        let sig = signal.clone();
        let w = Rc::clone(&won);
        kernel.spawn("racer", async move {
            w.set(Some(race_signal(&sig, q.pop()).await.is_some()));
            Ok(())
        });
        let k = kernel.clone();
        let sig = signal.clone();
        kernel.spawn("killer", async move {
            k.sleep(Duration::from_secs(1)).await;
            sig.fire();
            Ok(())
        });
        let k = kernel.clone();
        let q = queue.clone();
        kernel.spawn("producer", async move {
            k.sleep(Duration::from_secs(2)).await;
            q.push(42);
            Ok(())
        });

        kernel.run_until_idle().unwrap();
        assert_eq!(won.get(), Some(false));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain(), vec![42]);
    }

    #[test]
    fn delivered_item_survives_a_dropped_pop() {
        let kernel = Kernel::new();
        let queue: Queue<u32> = Queue::new();

        // Park a getter, deliver to it, then drop the future before it is
        // polled again: the item must come back to the head of the queue.
        let q = queue.clone();
        kernel.spawn("driver", async move {
            let mut pop = Box::pin(q.pop());
            // First poll parks the getter.
            std::future::poll_fn(|cx| {
                assert!(pop.as_mut().poll(cx).is_pending());
                Poll::Ready(())
            })
            .await;
            q.push(7);
            drop(pop);
            Ok(())
        });

        kernel.run_until_idle().unwrap();
        assert_eq!(queue.drain(), vec![7]);
    }

    #[test]
    fn race_signal_aborts_and_releases_resources() {
        let kernel = Kernel::new();
        let sem = Semaphore::new(1);
        let signal = Signal::new();
        let outcome = Rc::new(Cell::new(None));

        let k = kernel.clone();
        let s = sem.clone();
        let sig = signal.clone();
        let o = Rc::clone(&outcome);
        kernel.spawn("holder", async move {
            let inner_k = k.clone();
            let won = race_signal(&sig, async move {
                let _permit = s.acquire().await;
                inner_k.sleep(Duration::from_secs(60)).await;
            })
            .await;
            o.set(Some(won.is_some()));
            Ok(())
        });
        let k = kernel.clone();
        kernel.spawn("killer", async move {
            k.sleep(Duration::from_secs(1)).await;
            signal.fire();
            Ok(())
        });

        kernel.run_until_idle().unwrap();
        assert_eq!(outcome.get(), Some(false));
        // The dropped operation gave its permit back.
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn race_signal_short_circuits_when_already_fired() {
        let kernel = Kernel::new();
        let signal = Signal::new();
        signal.fire();
        let outcome = Rc::new(Cell::new(None));

        let o = Rc::clone(&outcome);
        let sig = signal.clone();
        kernel.spawn("late", async move {
            let won = race_signal(&sig, async { 1u32 }).await;
            o.set(Some(won));
            Ok(())
        });
        kernel.run_until_idle().unwrap();
        assert_eq!(outcome.get(), Some(None));
    }

    #[test]
    fn race2_ties_go_left() {
        let kernel = Kernel::new();
        let outcome = Rc::new(Cell::new(None));
        let o = Rc::clone(&outcome);
        kernel.spawn("tie", async move {
            match race2(async { "left" }, async { "right" }).await {
                Either::Left(v) => o.set(Some(v)),
                Either::Right(v) => o.set(Some(v)),
            }
            Ok(())
        });
        kernel.run_until_idle().unwrap();
        assert_eq!(outcome.get(), Some("left"));
    }
}

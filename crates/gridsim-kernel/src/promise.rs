//! Single-settlement promises.
//!
//! A [`Promise`] settles exactly once: `PENDING → RESOLVED | REJECTED`.
//! The first settlement wins and later `resolve`/`reject` calls are no-ops,
//! so a settled promise's value never changes. Any number of waiters may
//! observe the outcome.
//!
//! Combinators (`then`, `catch`, `race`) spawn continuation tasks on the
//! kernel, building a fixed DAG of promises that resolves lazily as virtual
//! time advances. `race` defuses the losing branches: their eventual
//! settlements — success or failure — never surface anywhere. A rejected
//! promise that is dropped without ever being observed or defused logs a
//! warning, since a discarded failure usually means a missing `catch`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::executor::Kernel;

enum State<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
}

struct PromiseInner<T, E> {
    state: State<T, E>,
    wakers: Vec<Waker>,
    /// A waiter was attached (`wait`/`then`/`catch`): the outcome is looked at.
    observed: bool,
    /// Losing race branch: the outcome is intentionally discarded.
    defused: bool,
}

impl<T, E> Drop for PromiseInner<T, E> {
    fn drop(&mut self) {
        if matches!(self.state, State::Rejected(_)) && !self.observed && !self.defused {
            tracing::warn!("promise rejected but never observed or defused");
        }
    }
}

/// A single-settlement future. Cheap to clone; clones share the settlement.
pub struct Promise<T, E> {
    inner: Rc<RefCell<PromiseInner<T, E>>>,
    kernel: Kernel,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: Rc::clone(&self.inner),
            kernel: self.kernel.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// A new pending promise.
    pub fn new(kernel: &Kernel) -> Self {
        Promise {
            inner: Rc::new(RefCell::new(PromiseInner {
                state: State::Pending,
                wakers: Vec::new(),
                observed: false,
                defused: false,
            })),
            kernel: kernel.clone(),
        }
    }

    /// A promise already resolved with `value`.
    pub fn resolved(kernel: &Kernel, value: T) -> Self {
        let p = Promise::new(kernel);
        p.resolve(value);
        p
    }

    /// Settle with a value. No-op if already settled.
    pub fn resolve(&self, value: T) {
        self.settle(State::Resolved(value));
    }

    /// Settle with an error. No-op if already settled.
    pub fn reject(&self, error: E) {
        self.settle(State::Rejected(error));
    }

    /// Whether the promise has settled (either way).
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending)
    }

    /// Mark the outcome as intentionally discarded, silencing the
    /// unobserved-rejection warning. Used for losing race branches.
    pub fn defuse(&self) {
        self.inner.borrow_mut().defused = true;
    }

    fn settle(&self, state: State<T, E>) {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.state, State::Pending) {
            return;
        }
        inner.state = state;
        for waker in inner.wakers.drain(..) {
            waker.wake();
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Suspend until settlement, then yield the value or the error.
    pub fn wait(&self) -> Wait<T, E> {
        self.inner.borrow_mut().observed = true;
        Wait {
            promise: self.clone(),
        }
    }

    /// Chain a continuation onto successful settlement.
    ///
    /// The returned promise settles with the continuation's (possibly
    /// suspending) result; if this promise rejects, the continuation never
    /// runs and the rejection propagates unchanged.
    pub fn then<U, F, Fut>(&self, f: F) -> Promise<U, E>
    where
        U: 'static,
        F: FnOnce(T) -> Fut + 'static,
        Fut: Future<Output = Result<U, E>> + 'static,
    {
        let next = Promise::new(&self.kernel);
        let source = self.clone();
        let out = next.clone();
        self.kernel.spawn("promise.then", async move {
            match source.wait().await {
                Ok(value) => match f(value).await {
                    Ok(u) => out.resolve(u),
                    Err(e) => out.reject(e),
                },
                Err(e) => out.reject(e),
            }
            Ok(())
        });
        next
    }

    /// Chain a handler onto rejection — the symmetric combinator to
    /// [`Promise::then`]. Successful settlement passes through unchanged.
    pub fn catch<F, Fut>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let next = Promise::new(&self.kernel);
        let source = self.clone();
        let out = next.clone();
        self.kernel.spawn("promise.catch", async move {
            match source.wait().await {
                Ok(value) => out.resolve(value),
                Err(e) => match f(e).await {
                    Ok(v) => out.resolve(v),
                    Err(e) => out.reject(e),
                },
            }
            Ok(())
        });
        next
    }

    /// Settle with whichever member promise settles first.
    ///
    /// All other members are defused: their later settlements, success or
    /// failure, are silently discarded. An abandoned alternative must never
    /// crash the simulation.
    pub fn race(kernel: &Kernel, promises: Vec<Promise<T, E>>) -> Promise<T, E> {
        let out = Promise::new(kernel);
        for member in promises {
            let out = out.clone();
            kernel.spawn("promise.race", async move {
                let outcome = member.wait().await;
                member.defuse();
                match outcome {
                    Ok(v) => out.resolve(v),
                    Err(e) => out.reject(e),
                }
                Ok(())
            });
        }
        out
    }
}

/// Future returned by [`Promise::wait`].
pub struct Wait<T, E> {
    promise: Promise<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Future for Wait<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.promise.inner.borrow_mut();
        match &inner.state {
            State::Resolved(v) => return Poll::Ready(Ok(v.clone())),
            State::Rejected(e) => return Poll::Ready(Err(e.clone())),
            State::Pending => {}
        }
        inner.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

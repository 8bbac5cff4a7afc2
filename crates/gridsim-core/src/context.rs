//! One simulation run.
//!
//! `SimContext` owns the kernel, the component registry, the gateway, the
//! telemetry sink, the network model, and the seeded RNG. Cheap to clone;
//! clones share the run. Destroyed when the run ends — nothing persists
//! across runs.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use gridsim_kernel::{Kernel, KernelResult, SimTime};

use crate::component::{Component, Proxy};
use crate::network::{Network, ZeroDelayNetwork};
use crate::telemetry::{NullTelemetry, Telemetry};

struct ContextInner {
    kernel: Kernel,
    components: RefCell<HashMap<String, Rc<dyn Component>>>,
    gateway: RefCell<Option<Rc<dyn Proxy>>>,
    telemetry: RefCell<Rc<dyn Telemetry>>,
    network: RefCell<Rc<dyn Network>>,
    rng: RefCell<SmallRng>,
    name_counter: Cell<u64>,
}

/// Handle to a simulation run.
#[derive(Clone)]
pub struct SimContext {
    inner: Rc<ContextInner>,
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("now", &self.inner.kernel.now())
            .finish_non_exhaustive()
    }
}

impl SimContext {
    /// Create a run with the given RNG seed, a zero-delay network, and no
    /// telemetry sink. The builder (or test) installs the gateway and any
    /// real sink afterwards.
    pub fn new(seed: u64) -> Self {
        let kernel = Kernel::new();
        let network = Rc::new(ZeroDelayNetwork::new(&kernel));
        SimContext {
            inner: Rc::new(ContextInner {
                kernel,
                components: RefCell::new(HashMap::new()),
                gateway: RefCell::new(None),
                telemetry: RefCell::new(Rc::new(NullTelemetry)),
                network: RefCell::new(network),
                rng: RefCell::new(SmallRng::seed_from_u64(seed)),
                name_counter: Cell::new(0),
            }),
        }
    }

    pub fn kernel(&self) -> Kernel {
        self.inner.kernel.clone()
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.inner.kernel.now()
    }

    // ── Component registry ──────────────────────────────────────────

    /// Register a component under its name, replacing any previous entry.
    pub fn register(&self, component: Rc<dyn Component>) {
        let name = component.name().to_string();
        self.inner.components.borrow_mut().insert(name, component);
    }

    /// Look up a registered component.
    pub fn component(&self, name: &str) -> Option<Rc<dyn Component>> {
        self.inner.components.borrow().get(name).cloned()
    }

    /// Deterministic generated name for components declared without one.
    pub fn gen_name(&self, prefix: &str) -> String {
        let n = self.inner.name_counter.get();
        self.inner.name_counter.set(n + 1);
        format!("{prefix}-{n}")
    }

    // ── Collaborators ───────────────────────────────────────────────

    pub fn set_gateway(&self, gateway: Rc<dyn Proxy>) {
        *self.inner.gateway.borrow_mut() = Some(gateway);
    }

    /// The run's gateway. Every run routes through one; building traffic
    /// before installing it is a configuration error.
    pub fn gateway(&self) -> Rc<dyn Proxy> {
        self.inner
            .gateway
            .borrow()
            .clone()
            .expect("no gateway installed in this simulation context")
    }

    pub fn set_telemetry(&self, telemetry: Rc<dyn Telemetry>) {
        *self.inner.telemetry.borrow_mut() = telemetry;
    }

    pub fn telemetry(&self) -> Rc<dyn Telemetry> {
        self.inner.telemetry.borrow().clone()
    }

    pub fn set_network(&self, network: Rc<dyn Network>) {
        *self.inner.network.borrow_mut() = network;
    }

    pub fn network(&self) -> Rc<dyn Network> {
        self.inner.network.borrow().clone()
    }

    /// Run a closure with the run's seeded RNG. All randomness in a run
    /// flows through here, which is what makes runs replayable.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut SmallRng) -> R) -> R {
        f(&mut self.inner.rng.borrow_mut())
    }

    // ── Run boundary ────────────────────────────────────────────────

    /// Advance virtual time by exactly `duration`, then flush the sink.
    ///
    /// `Duration::ZERO` is a no-op by contract — it does NOT mean "run
    /// until idle"; use [`SimContext::run_until_idle`] for that.
    pub fn simulate(&self, duration: Duration) -> KernelResult<()> {
        let deadline = self.now() + duration;
        self.inner.kernel.run_until(deadline)?;
        self.telemetry().flush();
        Ok(())
    }

    /// Run until no timers or runnable tasks remain, then flush the sink.
    ///
    /// Intended for tests; never terminates while periodic monitors keep
    /// re-arming timers.
    pub fn run_until_idle(&self) -> KernelResult<()> {
        self.inner.kernel.run_until_idle()?;
        self.telemetry().flush();
        Ok(())
    }

    /// Release sink resources.
    pub fn close(&self) {
        self.telemetry().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn generated_names_are_deterministic() {
        let ctx = SimContext::new(7);
        assert_eq!(ctx.gen_name("server"), "server-0");
        assert_eq!(ctx.gen_name("server"), "server-1");
        assert_eq!(ctx.gen_name("lb"), "lb-2");
    }

    #[test]
    fn same_seed_gives_same_rng_stream() {
        let a = SimContext::new(42);
        let b = SimContext::new(42);
        let xs: Vec<u32> = (0..5).map(|_| a.with_rng(|r| r.gen())).collect();
        let ys: Vec<u32> = (0..5).map(|_| b.with_rng(|r| r.gen())).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn simulate_advances_exactly_the_duration() {
        let ctx = SimContext::new(0);
        ctx.simulate(Duration::from_secs(5)).unwrap();
        assert_eq!(ctx.now(), SimTime::from_secs_f64(5.0));
        // Zero duration is a documented no-op.
        ctx.simulate(Duration::ZERO).unwrap();
        assert_eq!(ctx.now(), SimTime::from_secs_f64(5.0));
    }
}

//! Server instance lifecycle and admission.
//!
//! Status runs one way: STARTING → ACTIVE (after `start_up_delay`) →
//! TERMINATING (on `terminate`) → TERMINATED (after `shut_down_delay`,
//! when queued requests are failed and the alive signal fires).
//!
//! The worker loop acquires a thread permit *before* dequeueing, so a
//! parked dequeue means a thread is free to run the request immediately.
//! Admission can then tell "a free thread will take this now" from "this
//! would sit in the queue" and enforce the queue bound exactly — an
//! instance with a zero-length queue and all threads busy rejects
//! synchronously instead of parking the request.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use gridsim_core::{
    Client, Component, CostDistribution, DistributionError, ExchangePromise, Instance,
    InstanceStatus, Message, RequestRef, Scalar, SimContext, SimFault, SimResult, StatusCode,
};
use gridsim_kernel::{race_signal, Queue, Signal, SimTime};

use crate::endpoint::{EndpointFactory, EndpointSet};
use crate::thread_pool::ThreadPool;

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

type QueuedRequest = (String, String, RequestRef);

/// Declarative instance parameters; anything omitted takes the
/// [`ServerParams`] default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// CPU cores granted, e.g. `1.5` or `"500m"`.
    pub cpu_quota: Option<Scalar>,
    pub threads: Option<usize>,
    /// Admission queue bound; absent means unbounded, `0` means no queue.
    pub queue_size: Option<usize>,
    pub start_up_delay: Option<Scalar>,
    pub warming_up_time: Option<Scalar>,
    pub warming_up_factor_init: Option<f64>,
    pub shut_down_delay: Option<Scalar>,
}

impl ServerConfig {
    pub fn params(&self) -> Result<ServerParams, DistributionError> {
        let mut params = ServerParams::default();
        if let Some(quota) = &self.cpu_quota {
            params.cpu_quota = quota.value()?;
        }
        if let Some(threads) = self.threads {
            params.threads = threads;
        }
        params.queue_size = self.queue_size.or(params.queue_size);
        if let Some(delay) = &self.start_up_delay {
            params.start_up_delay = Duration::from_secs_f64(delay.value()?.max(0.0));
        }
        if let Some(time) = &self.warming_up_time {
            params.warming_up_time = Duration::from_secs_f64(time.value()?.max(0.0));
        }
        if let Some(factor) = self.warming_up_factor_init {
            params.warming_up_factor_init = factor;
        }
        if let Some(delay) = &self.shut_down_delay {
            params.shut_down_delay = Duration::from_secs_f64(delay.value()?.max(0.0));
        }
        Ok(params)
    }
}

/// Resolved instance parameters.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub cpu_quota: f64,
    pub threads: usize,
    pub queue_size: Option<usize>,
    pub start_up_delay: Duration,
    pub warming_up_time: Duration,
    pub warming_up_factor_init: f64,
    pub shut_down_delay: Duration,
}

impl Default for ServerParams {
    fn default() -> Self {
        ServerParams {
            cpu_quota: 1.0,
            threads: 32,
            queue_size: None,
            start_up_delay: Duration::ZERO,
            warming_up_time: Duration::ZERO,
            warming_up_factor_init: 2.0,
            shut_down_delay: Duration::from_secs(60),
        }
    }
}

/// One simulated server process.
pub struct ServerInstance {
    ctx: SimContext,
    name: String,
    service_name: Option<String>,
    params: ServerParams,
    endpoints: RefCell<Option<Rc<EndpointSet>>>,
    queue: Queue<QueuedRequest>,
    pool: Rc<ThreadPool>,
    client: Client,
    start_time: SimTime,
    status: Cell<InstanceStatus>,
    alive: Signal,
    self_ref: RefCell<Weak<ServerInstance>>,
}

impl ServerInstance {
    /// Create the instance, register it in the context, and start its
    /// startup, worker, and monitoring tasks.
    pub fn new(
        ctx: &SimContext,
        name: &str,
        service_name: Option<&str>,
        params: ServerParams,
        endpoint_factory: &EndpointFactory,
    ) -> Rc<Self> {
        let alive = Signal::new();
        let pool = ThreadPool::new(ctx, params.threads, &alive);
        let instance = Rc::new(ServerInstance {
            ctx: ctx.clone(),
            name: name.to_string(),
            service_name: service_name.map(str::to_string),
            params,
            endpoints: RefCell::new(None),
            queue: Queue::new(),
            pool,
            client: Client::new(ctx, name),
            start_time: ctx.now(),
            status: Cell::new(InstanceStatus::Starting),
            alive,
            self_ref: RefCell::new(Weak::new()),
        });
        *instance.self_ref.borrow_mut() = Rc::downgrade(&instance);
        *instance.endpoints.borrow_mut() =
            Some(endpoint_factory(ctx, Rc::downgrade(&instance)));
        ctx.register(Rc::clone(&instance) as Rc<dyn Component>);

        instance.spawn_startup();
        instance.spawn_worker();
        instance.spawn_monitor();
        debug!(instance = %instance.name, "instance starting");
        instance
    }

    fn spawn_startup(self: &Rc<Self>) {
        let inst = Rc::clone(self);
        self.ctx.kernel().spawn(format!("server.startup.{}", self.name), async move {
            inst.ctx.kernel().sleep(inst.params.start_up_delay).await;
            if inst.status.get() == InstanceStatus::Starting {
                inst.status.set(InstanceStatus::Active);
                debug!(instance = %inst.name, at = %inst.ctx.now(), "instance active");
            }
            Ok(())
        });
    }

    fn spawn_worker(self: &Rc<Self>) {
        let inst = Rc::clone(self);
        self.ctx.kernel().spawn(format!("server.worker.{}", self.name), async move {
            loop {
                // Thread first, then work: a parked dequeue advertises a
                // free thread to the admission check.
                let Some(permit) = race_signal(&inst.alive, inst.pool.acquire()).await else {
                    break;
                };
                let Some((_host, endpoint, rc)) =
                    race_signal(&inst.alive, inst.queue.pop()).await
                else {
                    break;
                };
                let handler = Rc::clone(&inst);
                inst.ctx.kernel().spawn("server.handle", async move {
                    let endpoints = handler.endpoints();
                    endpoints.dispatch(&endpoint, &rc).await;
                    drop(permit);
                    Ok(())
                });
            }
            Ok(())
        });
    }

    fn spawn_monitor(self: &Rc<Self>) {
        let inst = Rc::clone(self);
        self.ctx.kernel().spawn(format!("server.monitor.{}", self.name), async move {
            while !inst.alive.fired() {
                let mut tags = BTreeMap::new();
                if let Some(service) = &inst.service_name {
                    tags.insert("host_name".to_string(), service.clone());
                }
                tags.insert("instance_name".to_string(), inst.name.clone());
                for gauge in ["cpu_usage", "active_threads"] {
                    if let Some(value) = inst.metric(gauge) {
                        inst.ctx.telemetry().record(
                            gauge,
                            tags.clone(),
                            BTreeMap::from([("value".to_string(), value)]),
                            inst.ctx.now(),
                        );
                    }
                }
                let tick = inst.ctx.kernel().sleep(MONITOR_INTERVAL);
                if race_signal(&inst.alive, tick).await.is_none() {
                    break;
                }
            }
            Ok(())
        });
    }

    fn endpoints(&self) -> Rc<EndpointSet> {
        Rc::clone(
            self.endpoints
                .borrow()
                .as_ref()
                .expect("endpoint set installed at construction"),
        )
    }

    /// Consume simulated CPU time for one request.
    ///
    /// The sampled base cost is scaled by the contention slowdown
    /// `max(1, active_threads / cpu_quota)` and by the warm-up factor,
    /// then raced against the alive signal: death mid-compute aborts with
    /// [`SimFault::InstanceDown`]. The active-thread slot is released on
    /// every exit path.
    pub async fn compute(&self, cost: &CostDistribution) -> SimResult<()> {
        let base = self.ctx.with_rng(|rng| cost.sample(rng));
        let _guard = self.pool.begin_compute();
        let slowdown = (self.pool.active_threads() as f64 / self.params.cpu_quota).max(1.0);
        let wall = base * slowdown * self.warming_up_factor();
        let sleep = self.ctx.kernel().sleep(Duration::from_secs_f64(wall));
        race_signal(&self.alive, sleep)
            .await
            .ok_or(SimFault::InstanceDown)
    }

    /// Slowdown multiplier for a freshly activated instance: the initial
    /// penalty before activation, linear decay to 1.0 across
    /// `warming_up_time`, exactly 1.0 once the window has passed.
    pub fn warming_up_factor(&self) -> f64 {
        let since_activation = (self.ctx.now() - self.start_time).as_secs_f64()
            - self.params.start_up_delay.as_secs_f64();
        let window = self.params.warming_up_time.as_secs_f64();
        let initial = self.params.warming_up_factor_init;
        if since_activation < 0.0 {
            initial
        } else if since_activation >= window {
            1.0
        } else {
            initial + (1.0 - initial) * (since_activation / window)
        }
    }

    /// Issue a nested outbound request through this instance's client
    /// (fan-out to other services).
    pub fn send_request(&self, host: &str, endpoint: &str, request: Message) -> ExchangePromise {
        self.client.send_request(host, endpoint, request)
    }

    /// Rolling cpu usage gauge, capped per-sample at the quota.
    pub fn cpu_usage(&self) -> f64 {
        self.pool.cpu_usage(self.params.cpu_quota)
    }

    /// The terminal signal; fires exactly once, at TERMINATED.
    pub fn alive(&self) -> &Signal {
        &self.alive
    }
}

impl Component for ServerInstance {
    fn name(&self) -> &str {
        &self.name
    }

    /// Admission: stamp arrival, then accept only while ACTIVE or
    /// TERMINATING and within the queue bound. Rejections settle the
    /// request synchronously with CONNECTION_CLOSED — nothing blocks.
    fn recv_request(&self, host: &str, endpoint: &str, rc: RequestRef) {
        rc.set_instance_name(&self.name);
        rc.set_arrived(self.ctx.now());

        let accepting = matches!(
            self.status.get(),
            InstanceStatus::Active | InstanceStatus::Terminating
        );
        let would_queue = !self.queue.has_parked_getter();
        let over_bound = would_queue
            && self
                .params
                .queue_size
                .is_some_and(|cap| self.queue.len() >= cap);
        if !accepting || over_bound {
            debug!(
                instance = %self.name,
                status = %self.status.get(),
                queued = self.queue.len(),
                "admission rejected"
            );
            rc.fail(self.ctx.now(), StatusCode::ConnectionClosed);
            return;
        }
        self.queue.push((host.to_string(), endpoint.to_string(), rc));
    }

    fn metric(&self, name: &str) -> Option<f64> {
        if self.status.get() != InstanceStatus::Active {
            return None;
        }
        match name {
            "cpu_usage" => Some(self.cpu_usage()),
            "cpu_utilization" => Some(self.cpu_usage() / self.params.cpu_quota),
            "active_threads" => Some(self.pool.active_threads() as f64),
            _ => None,
        }
    }
}

impl Instance for ServerInstance {
    fn status(&self) -> InstanceStatus {
        self.status.get()
    }

    /// Enter TERMINATING now; after the shutdown grace period, fail the
    /// queued requests with SERVER_DOWN, fire the alive signal, and become
    /// TERMINATED.
    fn terminate(&self) {
        if matches!(
            self.status.get(),
            InstanceStatus::Terminating | InstanceStatus::Terminated
        ) {
            return;
        }
        self.status.set(InstanceStatus::Terminating);
        info!(instance = %self.name, at = %self.ctx.now(), "terminating");
        let Some(inst) = self.self_ref.borrow().upgrade() else {
            return;
        };
        self.ctx.kernel().spawn(format!("server.shutdown.{}", self.name), async move {
            inst.ctx.kernel().sleep(inst.params.shut_down_delay).await;
            let drained = inst.queue.drain();
            let pending = drained.len();
            for (_host, _endpoint, rc) in drained {
                rc.fail(inst.ctx.now(), StatusCode::ServerDown);
            }
            inst.status.set(InstanceStatus::Terminated);
            inst.alive.fire();
            info!(instance = %inst.name, pending, at = %inst.ctx.now(), "terminated");
            Ok(())
        });
    }
}

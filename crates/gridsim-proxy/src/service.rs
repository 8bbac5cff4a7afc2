//! Service — a scalable set of instances behind a load balancer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rand::Rng;
use tracing::{debug, info};

use gridsim_core::{
    Component, Instance, InstanceFactory, InstanceStatus, RequestRef, SimContext, StatusCode,
};

use crate::load_balancer::{LoadBalancer, RandomLoadBalancer};

const MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// A named service: instance map, load balancer, instance factory.
///
/// The map only ever holds STARTING and ACTIVE instances — `scale_to`
/// removes shrink victims immediately and they drain on their own.
pub struct Service {
    ctx: SimContext,
    name: String,
    instances: RefCell<BTreeMap<String, Rc<dyn Instance>>>,
    factory: InstanceFactory,
    balancer: Rc<dyn LoadBalancer>,
}

impl Service {
    /// Create the service, register it, scale to the initial replica
    /// count, and start the 1 Hz gauge loop.
    pub fn new(
        ctx: &SimContext,
        name: &str,
        factory: InstanceFactory,
        balancer: Option<Rc<dyn LoadBalancer>>,
        replicas: usize,
    ) -> Rc<Self> {
        let service = Rc::new(Service {
            ctx: ctx.clone(),
            name: name.to_string(),
            instances: RefCell::new(BTreeMap::new()),
            factory,
            balancer: balancer.unwrap_or_else(|| Rc::new(RandomLoadBalancer::new(ctx))),
        });
        ctx.register(Rc::clone(&service) as Rc<dyn Component>);
        service.scale_to(replicas);
        service.spawn_monitor();
        service
    }

    /// Resize the instance set.
    ///
    /// Growing invokes the factory for each missing replica. Shrinking
    /// terminates instances chosen preferentially from those still
    /// STARTING — discarding cold capacity before warmed-up ACTIVE
    /// instances — and removes them from the map immediately; each keeps
    /// draining asynchronously through its shutdown grace period.
    pub fn scale_to(&self, target: usize) {
        let current = self.instances.borrow().len();
        if target >= current {
            for _ in 0..target - current {
                let instance = (self.factory)(&self.ctx, &self.name);
                let name = instance.name().to_string();
                self.instances.borrow_mut().insert(name, instance);
            }
        } else {
            for _ in 0..current - target {
                let victim = self.pick_shrink_victim();
                let Some(name) = victim else { break };
                let instance = self.instances.borrow_mut().remove(&name);
                if let Some(instance) = instance {
                    debug!(service = %self.name, instance = %name, "terminating for scale-down");
                    instance.terminate();
                }
            }
        }
        if target != current {
            info!(service = %self.name, from = current, to = target, "scaled");
        }
    }

    fn pick_shrink_victim(&self) -> Option<String> {
        let instances = self.instances.borrow();
        let starting: Vec<&String> = instances
            .iter()
            .filter(|(_, inst)| inst.status() == InstanceStatus::Starting)
            .map(|(name, _)| name)
            .collect();
        let pool: Vec<&String> = if starting.is_empty() {
            instances.keys().collect()
        } else {
            starting
        };
        if pool.is_empty() {
            return None;
        }
        let index = self.ctx.with_rng(|rng| rng.gen_range(0..pool.len()));
        Some(pool[index].clone())
    }

    /// Snapshot of the ACTIVE instances.
    pub fn active_instances(&self) -> Vec<Rc<dyn Instance>> {
        self.instances
            .borrow()
            .values()
            .filter(|inst| inst.status() == InstanceStatus::Active)
            .cloned()
            .collect()
    }

    /// Snapshot of all instances in the map (STARTING and ACTIVE).
    pub fn instances(&self) -> Vec<Rc<dyn Instance>> {
        self.instances.borrow().values().cloned().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.borrow().len()
    }

    fn spawn_monitor(self: &Rc<Self>) {
        let service = Rc::clone(self);
        self.ctx
            .kernel()
            .spawn(format!("service.monitor.{}", self.name), monitor_loop(service));
    }
}

/// 1 Hz instance-count gauges, for the lifetime of the run.
async fn monitor_loop(service: Rc<Service>) -> anyhow::Result<()> {
    loop {
        let tags =
            std::collections::BTreeMap::from([("host_name".to_string(), service.name.clone())]);
        for gauge in ["instance_num", "active_instance_num"] {
            if let Some(value) = service.metric(gauge) {
                service.ctx.telemetry().record(
                    gauge,
                    tags.clone(),
                    std::collections::BTreeMap::from([("value".to_string(), value)]),
                    service.ctx.now(),
                );
            }
        }
        service.ctx.kernel().sleep(MONITOR_INTERVAL).await;
    }
}

impl Component for Service {
    fn name(&self) -> &str {
        &self.name
    }

    /// Load-balance to an ACTIVE instance, or refuse when none exists.
    fn recv_request(&self, host: &str, endpoint: &str, rc: RequestRef) {
        match self.balancer.select(&self.active_instances()) {
            Some(instance) => instance.recv_request(host, endpoint, rc),
            None => {
                debug!(service = %self.name, "no active instance available");
                rc.fail(self.ctx.now(), StatusCode::ConnectionRefused);
            }
        }
    }

    fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "instance_num" => Some(self.instance_count() as f64),
            "active_instance_num" => Some(self.active_instances().len() as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_core::Message;
    use gridsim_core::RequestContext;
    use std::cell::Cell;

    /// Instance stub with a controllable status.
    struct FakeInstance {
        name: String,
        status: Cell<InstanceStatus>,
        terminated: Cell<bool>,
        received: Cell<u32>,
    }

    impl FakeInstance {
        fn new(name: String, status: InstanceStatus) -> Rc<Self> {
            Rc::new(FakeInstance {
                name,
                status: Cell::new(status),
                terminated: Cell::new(false),
                received: Cell::new(0),
            })
        }
    }

    impl Component for FakeInstance {
        fn name(&self) -> &str {
            &self.name
        }
        fn recv_request(&self, _h: &str, _e: &str, rc: RequestRef) {
            self.received.set(self.received.get() + 1);
            rc.server_promise().defuse();
        }
    }

    impl Instance for FakeInstance {
        fn status(&self) -> InstanceStatus {
            self.status.get()
        }
        fn terminate(&self) {
            self.terminated.set(true);
            self.status.set(InstanceStatus::Terminating);
        }
    }

    fn factory_with(
        created: Rc<RefCell<Vec<Rc<FakeInstance>>>>,
        status: InstanceStatus,
    ) -> InstanceFactory {
        Rc::new(move |ctx: &SimContext, service: &str| {
            let inst = FakeInstance::new(ctx.gen_name(&format!("{service}-inst")), status);
            created.borrow_mut().push(Rc::clone(&inst));
            inst as Rc<dyn Instance>
        })
    }

    #[test]
    fn scale_up_invokes_the_factory() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Active),
            None,
            2,
        );
        assert_eq!(service.instance_count(), 2);

        service.scale_to(5);
        assert_eq!(service.instance_count(), 5);
        assert_eq!(created.borrow().len(), 5);
    }

    #[test]
    fn scale_down_removes_and_terminates() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Active),
            None,
            4,
        );
        service.scale_to(1);
        assert_eq!(service.instance_count(), 1);
        let terminated = created
            .borrow()
            .iter()
            .filter(|i| i.terminated.get())
            .count();
        assert_eq!(terminated, 3);
    }

    #[test]
    fn shrink_prefers_starting_instances() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Active),
            None,
            3,
        );
        // A cold instance joins the warmed-up ones.
        created.borrow_mut()[1].status.set(InstanceStatus::Starting);

        service.scale_to(2);
        let snapshot = created.borrow();
        assert!(
            snapshot[1].terminated.get(),
            "the STARTING instance should be the shrink victim"
        );
        assert!(!snapshot[0].terminated.get());
        assert!(!snapshot[2].terminated.get());
    }

    #[test]
    fn requests_balance_only_across_active_instances() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Active),
            None,
            3,
        );
        created.borrow_mut()[0].status.set(InstanceStatus::Starting);

        for _ in 0..20 {
            let rc = RequestContext::new(&ctx.kernel(), Message::default());
            service.recv_request("svc", "/api", rc);
        }
        let snapshot = created.borrow();
        assert_eq!(snapshot[0].received.get(), 0);
        assert_eq!(
            snapshot[1].received.get() + snapshot[2].received.get(),
            20
        );
    }

    #[test]
    fn no_active_instance_refuses_the_request() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Starting),
            None,
            2,
        );
        let rc = RequestContext::new(&ctx.kernel(), Message::default());
        service.recv_request("svc", "/api", Rc::clone(&rc));
        assert_eq!(rc.status(), Some(StatusCode::ConnectionRefused));
        rc.server_promise().defuse();
    }

    #[test]
    fn gauges_reflect_the_instance_set() {
        let ctx = SimContext::new(0);
        let created = Rc::new(RefCell::new(Vec::new()));
        let service = Service::new(
            &ctx,
            "svc",
            factory_with(Rc::clone(&created), InstanceStatus::Active),
            None,
            3,
        );
        created.borrow_mut()[0].status.set(InstanceStatus::Starting);
        assert_eq!(service.metric("instance_num"), Some(3.0));
        assert_eq!(service.metric("active_instance_num"), Some(2.0));
        assert_eq!(service.metric("nope"), None);
    }
}

//! Gateway — the named-host registry every client routes through.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use gridsim_core::{Client, Component, Proxy, RequestRef, SimContext, StatusCode};

/// Resolves host names to registered components and can itself serve as a
/// request receiver (requests routed "by proxy" rather than by name).
pub struct Gateway {
    ctx: SimContext,
    name: String,
    hosts: RefCell<HashSet<String>>,
    client: Client,
}

impl Gateway {
    /// Create and register the gateway. It still has to be installed as
    /// the context gateway by the builder.
    pub fn new(ctx: &SimContext, name: Option<&str>, hosts: Vec<String>) -> Rc<Self> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| ctx.gen_name("gateway"));
        let gateway = Rc::new(Gateway {
            ctx: ctx.clone(),
            client: Client::new(ctx, &name),
            name,
            hosts: RefCell::new(hosts.into_iter().collect()),
        });
        ctx.register(Rc::clone(&gateway) as Rc<dyn Component>);
        gateway
    }

    /// Add host names to the routing table.
    pub fn register_hosts<I: IntoIterator<Item = String>>(&self, hosts: I) {
        self.hosts.borrow_mut().extend(hosts);
    }
}

impl Component for Gateway {
    fn name(&self) -> &str {
        &self.name
    }

    /// Serve a request delegated to the gateway wholesale: forward it to
    /// the target host through the gateway's own client and map any
    /// failure to SERVER_ERROR.
    fn recv_request(&self, host: &str, endpoint: &str, rc: RequestRef) {
        rc.set_arrived(self.ctx.now());
        rc.set_proc_started(self.ctx.now());

        let ctx = self.ctx.clone();
        let forwarded = self.client.send_request(host, endpoint, rc.request().clone());
        self.ctx.kernel().spawn("gateway.forward", async move {
            match forwarded.wait().await {
                Ok(response) => rc.complete(ctx.now(), response),
                Err(fault) => {
                    debug!(error = %fault, "forwarded request failed");
                    rc.fail(ctx.now(), StatusCode::ServerError);
                }
            }
            Ok(())
        });
    }
}

impl Proxy for Gateway {
    /// Unregistered hosts are a programming error, not a runtime
    /// condition — scenarios must register every host they route to.
    fn find_component(
        &self,
        host: &str,
        _endpoint: &str,
        _rc: &RequestRef,
    ) -> Option<Rc<dyn Component>> {
        assert!(
            self.hosts.borrow().contains(host),
            "host '{host}' is not registered with gateway '{}'",
            self.name
        );
        let component = self
            .ctx
            .component(host)
            .unwrap_or_else(|| panic!("registered host '{host}' has no component"));
        Some(component)
    }

    fn as_component(self: Rc<Self>) -> Rc<dyn Component> {
        self
    }
}

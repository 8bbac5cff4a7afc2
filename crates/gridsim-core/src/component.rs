//! Component interfaces — the seams between the dispatch plane, server
//! instances, and the autoscaler.
//!
//! Routing and metric access are explicit trait methods rather than
//! stringly-typed attribute lookups: a proxy resolves receivers with
//! `find_component`, an instance exposes its lifecycle status and gauges.

use std::rc::Rc;

use crate::context::SimContext;
use crate::request::RequestRef;

/// A named participant in the simulation that can receive requests.
pub trait Component {
    fn name(&self) -> &str;

    /// Deliver a request. Implementations stamp lifecycle timestamps and
    /// either process, forward, or reject the request; rejections settle
    /// the context synchronously.
    fn recv_request(&self, host: &str, endpoint: &str, rc: RequestRef);

    /// Named gauge metric, if this component exposes it.
    fn metric(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// A routing entity: gateway or load balancer.
pub trait Proxy: Component {
    /// Resolve the concrete receiver for `host`/`endpoint`, or `None` when
    /// nothing is available (the caller reports CONNECTION_REFUSED).
    ///
    /// A gateway treats an unregistered host as a programming error and
    /// panics rather than returning `None`.
    fn find_component(&self, host: &str, endpoint: &str, rc: &RequestRef)
        -> Option<Rc<dyn Component>>;

    /// This proxy viewed as a plain receiver, for requests routed to the
    /// proxy wholesale rather than resolved by name.
    fn as_component(self: Rc<Self>) -> Rc<dyn Component>;
}

/// Lifecycle status of a server instance. Transitions are one-way through
/// the listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Starting,
    Active,
    Terminating,
    Terminated,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Terminating => "TERMINATING",
            InstanceStatus::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// A simulated server process hosting endpoint handlers.
pub trait Instance: Component {
    fn status(&self) -> InstanceStatus;

    /// Begin the TERMINATING → TERMINATED transition; draining continues
    /// asynchronously.
    fn terminate(&self);
}

/// Builds one instance for a service. Called by `scale_to` on growth with
/// the owning service's name.
pub type InstanceFactory = Rc<dyn Fn(&SimContext, &str) -> Rc<dyn Instance>>;

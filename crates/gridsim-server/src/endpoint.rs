//! Endpoint dispatch.
//!
//! Handlers are an explicit path → closure mapping built by registration
//! calls — no reflection, no attribute scanning. A handler may suspend,
//! issue compute operations, and fan out nested requests; it resolves to a
//! response or a fault, which dispatch maps onto the request context:
//! instance death becomes SERVER_DOWN, anything else SERVER_ERROR.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use serde::Deserialize;

use gridsim_core::{
    DistributionConfig, DistributionError, Message, RequestRef, SimContext, SimFault, SimResult,
    StatusCode,
};

use crate::instance::ServerInstance;

/// A handler's in-flight work.
pub type HandlerFuture = Pin<Box<dyn Future<Output = SimResult<Message>>>>;

/// One endpoint handler: request in, response (or fault) out.
pub type Handler = Rc<dyn Fn(Message) -> HandlerFuture>;

/// Builds an instance's endpoint set. Gets a weak handle because handlers
/// routinely call back into the instance (compute, nested sends).
pub type EndpointFactory = Rc<dyn Fn(&SimContext, Weak<ServerInstance>) -> Rc<EndpointSet>>;

/// The per-instance path → handler table.
pub struct EndpointSet {
    ctx: SimContext,
    handlers: RefCell<HashMap<String, Handler>>,
}

impl EndpointSet {
    pub fn new(ctx: &SimContext) -> Rc<Self> {
        Rc::new(EndpointSet {
            ctx: ctx.clone(),
            handlers: RefCell::new(HashMap::new()),
        })
    }

    /// Register a handler under a path, replacing any previous one.
    pub fn register(&self, path: &str, handler: Handler) {
        self.handlers.borrow_mut().insert(path.to_string(), handler);
    }

    /// Run the handler for `endpoint` and settle the request context.
    pub async fn dispatch(&self, endpoint: &str, rc: &RequestRef) {
        rc.set_proc_started(self.ctx.now());
        let handler = self.handlers.borrow().get(endpoint).cloned();
        let Some(handler) = handler else {
            tracing::warn!(endpoint, "no handler registered for path");
            rc.fail(self.ctx.now(), StatusCode::ServerError);
            return;
        };
        match handler(rc.request().clone()).await {
            Ok(response) => rc.complete(self.ctx.now(), response),
            Err(SimFault::InstanceDown) => rc.fail(self.ctx.now(), StatusCode::ServerDown),
            Err(_) => rc.fail(self.ctx.now(), StatusCode::ServerError),
        }
    }
}

/// Declarative endpoint table: per path, a computation cost and an ordered
/// list of downstream dependencies called after the compute.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticEndpointConfig {
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSpec {
    pub endpoint_name: String,
    /// Downstream `(host, endpoint)` calls, issued sequentially.
    #[serde(default)]
    pub dependencies: Vec<(String, String)>,
    pub computation_time: DistributionConfig,
}

impl StaticEndpointConfig {
    /// Validate the cost distributions and produce the endpoint factory.
    pub fn build_factory(&self) -> Result<EndpointFactory, DistributionError> {
        let mut table = Vec::with_capacity(self.endpoints.len());
        for spec in &self.endpoints {
            table.push((
                spec.endpoint_name.clone(),
                spec.dependencies.clone(),
                spec.computation_time.build()?,
            ));
        }

        Ok(Rc::new(move |ctx: &SimContext, instance: Weak<ServerInstance>| {
            let set = EndpointSet::new(ctx);
            for (path, dependencies, cost) in &table {
                let cost = cost.clone();
                let dependencies = dependencies.clone();
                let instance = instance.clone();
                set.register(
                    path,
                    Rc::new(move |_request: Message| -> HandlerFuture {
                        let cost = cost.clone();
                        let dependencies = dependencies.clone();
                        let instance = instance.clone();
                        Box::pin(async move {
                            let Some(instance) = instance.upgrade() else {
                                return Err(SimFault::InstanceDown);
                            };
                            instance.compute(&cost).await?;
                            for (host, endpoint) in &dependencies {
                                instance
                                    .send_request(host, endpoint, Message::default())
                                    .wait()
                                    .await?;
                            }
                            Ok(Message::default())
                        })
                    }),
                );
            }
            set
        }))
    }
}

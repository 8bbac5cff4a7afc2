//! gridsim-server — simulated server instances.
//!
//! A [`ServerInstance`] models one server process:
//!
//! - lifecycle STARTING → ACTIVE → TERMINATING → TERMINATED
//! - a bounded admission queue in front of a fixed-capacity [`ThreadPool`]
//! - endpoint dispatch with per-path handlers ([`EndpointSet`])
//! - a compute model with contention slowdown and warm-up penalty
//! - 1 Hz gauges (cpu_usage, active_threads) to the telemetry sink
//!
//! Death is cancellation: every blocking step races the instance's alive
//! signal, and losing releases held resources and surfaces SERVER_DOWN.

pub mod endpoint;
pub mod instance;
pub mod thread_pool;

pub use endpoint::{
    EndpointFactory, EndpointSet, EndpointSpec, Handler, HandlerFuture, StaticEndpointConfig,
};
pub use instance::{ServerConfig, ServerInstance, ServerParams};
pub use thread_pool::ThreadPool;

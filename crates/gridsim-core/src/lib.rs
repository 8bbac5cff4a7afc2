//! gridsim-core — request lifecycle and component interfaces.
//!
//! Everything above the kernel and below the concrete components:
//!
//! - `StatusCode` / `SimFault` — the terminal error taxonomy
//! - `Message` / `RequestContext` — per-request lifecycle state machine
//! - `Client` — the exchange protocol (transmit → deliver → server promise
//!   → return transmit), including the timeout race
//! - `SimContext` — one simulation run: kernel, component registry,
//!   gateway, telemetry sink, network model, seeded RNG
//! - `Component` / `Proxy` / `Instance` traits — the seams the dispatch
//!   plane, servers, and autoscaler plug into
//! - `Network` / `Telemetry` — external-collaborator interfaces with
//!   in-crate defaults (zero-delay network, no-op sink)
//! - `CostDistribution` — lognormal/normal computation-cost sampling

pub mod client;
pub mod component;
pub mod context;
pub mod distribution;
pub mod error;
pub mod network;
pub mod request;
pub mod telemetry;

pub use client::{Client, SendOptions};
pub use component::{Component, Instance, InstanceFactory, InstanceStatus, Proxy};
pub use context::SimContext;
pub use distribution::{CostDistribution, DistributionConfig, DistributionError, Scalar};
pub use error::{SimFault, SimResult, StatusCode};
pub use network::{Network, ZeroDelayNetwork};
pub use request::{ExchangePromise, Message, RequestContext, RequestRef};
pub use telemetry::{NullTelemetry, Telemetry};

//! gridsim-loadgen — traffic drivers.
//!
//! Load generators issue fire-and-forget requests through a [`Client`];
//! each request records its own telemetry when it ends, so the generator
//! never waits on outcomes.
//!
//! - [`RpsLoadGenerator`] — constant requests-per-second
//! - [`DynamicRpsLoadGenerator`] — piecewise rate curve with linear, step,
//!   and quadratic-ease interpolation
//!
//! [`Client`]: gridsim_core::Client

pub mod dynamic;
pub mod rps;

pub use dynamic::{
    DynamicRpsConfig, DynamicRpsLoadGenerator, DynamicRpsParams, RateCurve, RateMode, RatePoint,
};
pub use rps::{RpsConfig, RpsLoadGenerator, RpsParams};

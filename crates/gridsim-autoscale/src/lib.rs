//! gridsim-autoscale — the horizontal autoscaling control loop.
//!
//! Polls instance metrics on its own schedule and resizes the owned
//! service. Scale-up reacts to the instantaneous average immediately;
//! scale-down is throttled by the worst recent sample in a stabilization
//! window, so one low reading never discards capacity. That asymmetry is
//! the point of the design.

pub mod scaler;

pub use scaler::{scale_compute, AutoscalerConfig, AutoscalerParams, HorizontalAutoscaler};

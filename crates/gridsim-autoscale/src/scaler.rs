//! The horizontal autoscaler.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use gridsim_core::{Component, DistributionError, Instance, InstanceStatus, Scalar, SimContext};
use gridsim_kernel::SimTime;
use gridsim_proxy::Service;

/// Cadence of the trigger-check loop; actual evaluations fire every
/// `interval`.
const TICK: Duration = Duration::from_secs(1);

/// Replica count for a target utilization:
/// `clamp(ceil(current * util / target), min, max)`.
pub fn scale_compute(current: usize, target: f64, util: f64, min: usize, max: usize) -> usize {
    let optimal = (current as f64 * util / target).ceil();
    let optimal = optimal.max(min as f64).min(max as f64);
    optimal as usize
}

/// Declarative autoscaler parameters; omitted fields take the
/// [`AutoscalerParams`] defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    /// Instance gauge to average, e.g. `cpu_utilization`.
    pub metric_name: String,
    /// Per-instance target for that gauge.
    pub target_value: f64,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub min_num: Option<usize>,
    #[serde(default)]
    pub max_num: Option<usize>,
    #[serde(default)]
    pub interval: Option<Scalar>,
    #[serde(default)]
    pub downscale_stabilization_window: Option<Scalar>,
}

impl AutoscalerConfig {
    pub fn params(&self) -> Result<AutoscalerParams, DistributionError> {
        let mut params = AutoscalerParams::new(&self.metric_name, self.target_value);
        if let Some(enabled) = self.enabled {
            params.enabled = enabled;
        }
        if let Some(min) = self.min_num {
            params.min_num = min;
        }
        if let Some(max) = self.max_num {
            params.max_num = max;
        }
        if let Some(interval) = &self.interval {
            params.interval = Duration::from_secs_f64(interval.value()?.max(0.0));
        }
        if let Some(window) = &self.downscale_stabilization_window {
            params.stabilization_window = Duration::from_secs_f64(window.value()?.max(0.0));
        }
        Ok(params)
    }
}

/// Resolved autoscaler parameters.
#[derive(Debug, Clone)]
pub struct AutoscalerParams {
    pub metric_name: String,
    pub target_value: f64,
    pub enabled: bool,
    pub min_num: usize,
    pub max_num: usize,
    pub interval: Duration,
    pub stabilization_window: Duration,
}

impl AutoscalerParams {
    pub fn new(metric_name: &str, target_value: f64) -> Self {
        AutoscalerParams {
            metric_name: metric_name.to_string(),
            target_value,
            enabled: true,
            min_num: 1,
            max_num: 10,
            interval: Duration::from_secs(15),
            stabilization_window: Duration::from_secs(300),
        }
    }
}

/// Periodically samples the owned service's ACTIVE instances and resizes
/// the instance set.
pub struct HorizontalAutoscaler {
    ctx: SimContext,
    service: Rc<Service>,
    params: AutoscalerParams,
    last_trigger: Cell<SimTime>,
    /// `(time, avg)` samples, bounded by the stabilization window.
    window: RefCell<Vec<(SimTime, f64)>>,
}

impl HorizontalAutoscaler {
    /// Create the autoscaler and start its control loop.
    pub fn new(ctx: &SimContext, service: Rc<Service>, params: AutoscalerParams) -> Rc<Self> {
        let scaler = Rc::new(HorizontalAutoscaler {
            ctx: ctx.clone(),
            service,
            params,
            last_trigger: Cell::new(SimTime::ZERO),
            window: RefCell::new(Vec::new()),
        });
        let looped = Rc::clone(&scaler);
        ctx.kernel().spawn(
            format!("autoscaler.{}", scaler.service.name()),
            control_loop(looped),
        );
        scaler
    }

    /// One evaluation: sample, update the stabilization window, decide.
    ///
    /// Scale-up takes the instantaneous average (react to spikes now);
    /// scale-down takes the window maximum (don't react to one low
    /// sample). In between, do nothing.
    pub fn evaluate(&self) {
        let samples: Vec<f64> = self
            .service
            .instances()
            .iter()
            .filter(|inst| inst.status() == InstanceStatus::Active)
            .filter_map(|inst| inst.metric(&self.params.metric_name))
            .collect();
        if samples.is_empty() {
            // Nothing ACTIVE to measure; skip this tick entirely.
            return;
        }

        let now = self.ctx.now();
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        let mut window = self.window.borrow_mut();
        window.push((now, avg));
        window.retain(|(t, _)| now.since(*t) < self.params.stabilization_window);
        let window_max = window
            .iter()
            .map(|(_, v)| *v)
            .fold(avg, f64::max);
        drop(window);

        let current = samples.len();
        let optimal = scale_compute(
            current,
            self.params.target_value,
            avg,
            self.params.min_num,
            self.params.max_num,
        );
        let window_optimal = scale_compute(
            current,
            self.params.target_value,
            window_max,
            self.params.min_num,
            self.params.max_num,
        );

        if optimal >= current {
            if optimal > current {
                info!(
                    service = %self.service.name(),
                    from = current,
                    to = optimal,
                    avg,
                    "scaling up"
                );
            }
            self.service.scale_to(optimal);
        } else if window_optimal < current {
            info!(
                service = %self.service.name(),
                from = current,
                to = window_optimal,
                avg,
                window_max,
                "scaling down"
            );
            self.service.scale_to(window_optimal);
        } else {
            debug!(
                service = %self.service.name(),
                current,
                optimal,
                window_optimal,
                "holding"
            );
        }
    }
}

/// Ticks once a second; evaluates whenever a full interval has elapsed.
async fn control_loop(scaler: Rc<HorizontalAutoscaler>) -> anyhow::Result<()> {
    loop {
        scaler.ctx.kernel().sleep(TICK).await;
        if !scaler.params.enabled {
            continue;
        }
        let now = scaler.ctx.now();
        if now.since(scaler.last_trigger.get()) >= scaler.params.interval {
            scaler
                .last_trigger
                .set(scaler.last_trigger.get() + scaler.params.interval);
            scaler.evaluate();
        }
    }
}

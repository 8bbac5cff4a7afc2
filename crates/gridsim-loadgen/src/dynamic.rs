//! Piecewise-dynamic load generation.
//!
//! The rate curve is a sorted list of `(time, rps, mode)` points; the mode
//! on a point describes how the rate approaches it from the previous
//! point. Beyond the last point the last rate holds.

use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;

use gridsim_core::{Client, DistributionError, Message, Scalar, SendOptions, SimContext};

/// How the rate moves between two curve points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    Linear,
    /// Jump to the end value at the start of the segment.
    StepStart,
    /// Hold the start value until the end of the segment.
    StepEnd,
    /// Quadratic ease-in toward the end value.
    Accelerating,
    /// Quadratic ease-out toward the end value.
    Decelerating,
}

impl Default for RateMode {
    fn default() -> Self {
        RateMode::Linear
    }
}

/// One point on the rate curve.
#[derive(Debug, Clone, Deserialize)]
pub struct RatePoint {
    pub time: Scalar,
    pub rps: f64,
    #[serde(default)]
    pub mode: RateMode,
}

/// Declarative form of a dynamic-RPS generator.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicRpsConfig {
    pub rps_list: Vec<RatePoint>,
    pub host: String,
    pub endpoint: String,
    #[serde(default)]
    pub timeout: Option<Scalar>,
    #[serde(default)]
    pub by_proxy: Option<bool>,
    #[serde(default)]
    pub request: Option<Message>,
}

/// A preprocessed rate curve: sorted by time, with an implicit
/// `(0, 0, linear)` origin when the first point starts later.
#[derive(Debug, Clone)]
pub struct RateCurve {
    points: Vec<(f64, f64, RateMode)>,
}

impl RateCurve {
    pub fn new(points: &[RatePoint]) -> Result<Self, DistributionError> {
        let mut resolved = Vec::with_capacity(points.len() + 1);
        for point in points {
            resolved.push((point.time.value()?.max(0.0), point.rps, point.mode));
        }
        resolved.sort_by(|a, b| a.0.total_cmp(&b.0));
        if resolved.first().map(|p| p.0) != Some(0.0) {
            resolved.insert(0, (0.0, 0.0, RateMode::Linear));
        }
        Ok(RateCurve { points: resolved })
    }

    /// The rate at virtual time `t` (seconds).
    pub fn rate_at(&self, t: f64) -> f64 {
        match self.points.len() {
            0 => return 0.0,
            1 => return self.points[0].1,
            _ => {}
        }
        let idx = self.points.partition_point(|(time, _, _)| *time < t);
        let (start, end) = if idx == 0 {
            (self.points[0], self.points[1])
        } else if idx == self.points.len() {
            (self.points[idx - 2], self.points[idx - 1])
        } else {
            (self.points[idx - 1], self.points[idx])
        };

        let (start_time, start_value, _) = start;
        let (end_time, end_value, mode) = end;
        if start_time <= t && t < end_time {
            let frac = (t - start_time) / (end_time - start_time);
            match mode {
                RateMode::Linear => start_value + (end_value - start_value) * frac,
                RateMode::StepStart => end_value,
                RateMode::StepEnd => start_value,
                RateMode::Accelerating => start_value + (end_value - start_value) * frac * frac,
                RateMode::Decelerating => {
                    start_value + (end_value - start_value) * (1.0 - (1.0 - frac) * (1.0 - frac))
                }
            }
        } else {
            // Past the end of the curve: the last rate holds.
            self.points[self.points.len() - 1].1
        }
    }
}

/// Resolved dynamic-generator parameters.
#[derive(Debug, Clone)]
pub struct DynamicRpsParams {
    pub curve: RateCurve,
    pub host: String,
    pub endpoint: String,
    pub timeout: Option<Duration>,
    pub by_proxy: bool,
    pub request: Message,
}

impl DynamicRpsConfig {
    pub fn params(&self) -> Result<DynamicRpsParams, DistributionError> {
        Ok(DynamicRpsParams {
            curve: RateCurve::new(&self.rps_list)?,
            host: self.host.clone(),
            endpoint: self.endpoint.clone(),
            timeout: match &self.timeout {
                Some(t) => Some(Duration::from_secs_f64(t.value()?.max(0.0))),
                None => None,
            },
            by_proxy: self.by_proxy.unwrap_or(false),
            request: self.request.clone().unwrap_or_default(),
        })
    }
}

/// Drives traffic along a rate curve. Rates below one request per second
/// idle in 100 ms steps until the curve climbs.
pub struct DynamicRpsLoadGenerator {
    ctx: SimContext,
    name: String,
    client: Client,
    params: DynamicRpsParams,
}

impl DynamicRpsLoadGenerator {
    pub fn new(ctx: &SimContext, name: Option<&str>, params: DynamicRpsParams) -> Rc<Self> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| ctx.gen_name("loadgen"));
        let generator = Rc::new(DynamicRpsLoadGenerator {
            ctx: ctx.clone(),
            client: Client::new(ctx, &name),
            name,
            params,
        });
        let looped = Rc::clone(&generator);
        ctx.kernel()
            .spawn(format!("loadgen.{}", generator.name), generate_loop(looped));
        generator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured rate at the current virtual time.
    pub fn current_rate(&self) -> f64 {
        self.params.curve.rate_at(self.ctx.now().as_secs_f64())
    }
}

async fn generate_loop(generator: Rc<DynamicRpsLoadGenerator>) -> anyhow::Result<()> {
    loop {
        let rate = generator.current_rate();
        if rate >= 1.0 {
            generator
                .ctx
                .kernel()
                .sleep(Duration::from_secs_f64(1.0 / rate))
                .await;
            let promise = generator.client.send_request_with(
                &generator.params.host,
                &generator.params.endpoint,
                generator.params.request.clone(),
                SendOptions {
                    timeout: generator.params.timeout,
                    proxy: None,
                    by_proxy: generator.params.by_proxy,
                },
            );
            promise.defuse();
        } else {
            generator
                .ctx
                .kernel()
                .sleep(Duration::from_millis(100))
                .await;
        }
    }
}

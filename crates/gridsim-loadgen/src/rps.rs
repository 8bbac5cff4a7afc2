//! Constant-rate load generation.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;

use gridsim_core::{Client, Message, Scalar, SendOptions, SimContext};
use gridsim_core::DistributionError;

/// Declarative form of a constant-RPS generator.
#[derive(Debug, Clone, Deserialize)]
pub struct RpsConfig {
    pub rps: f64,
    pub host: String,
    pub endpoint: String,
    #[serde(default)]
    pub timeout: Option<Scalar>,
    #[serde(default)]
    pub by_proxy: Option<bool>,
    /// Template for every request payload.
    #[serde(default)]
    pub request: Option<Message>,
}

impl RpsConfig {
    pub fn params(&self) -> Result<RpsParams, DistributionError> {
        Ok(RpsParams {
            rps: self.rps,
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

/// Resolved generator parameters.
#[derive(Debug, Clone)]
pub struct RpsParams {
    pub rps: f64,
    pub host: String,
    pub endpoint: String,
    pub timeout: Option<Duration>,
    pub by_proxy: bool,
    pub request: Message,
}

/// Issues one request every `1/rps` seconds of virtual time. A zero rate
/// idles in 100 ms steps so the rate can be raised mid-run.
pub struct RpsLoadGenerator {
    ctx: SimContext,
    name: String,
    client: Client,
    rps: Cell<f64>,
    params: RpsParams,
}

impl RpsLoadGenerator {
    pub fn new(ctx: &SimContext, name: Option<&str>, params: RpsParams) -> Rc<Self> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| ctx.gen_name("loadgen"));
        let generator = Rc::new(RpsLoadGenerator {
            ctx: ctx.clone(),
            client: Client::new(ctx, &name),
            name,
            rps: Cell::new(params.rps),
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

    /// Adjust the rate mid-run (scenario scripting).
    pub fn set_rps(&self, rps: f64) {
        self.rps.set(rps);
    }

    fn fire_one(&self) {
        let promise = self.client.send_request_with(
            &self.params.host,
            &self.params.endpoint,
            self.params.request.clone(),
            SendOptions {
                timeout: self.params.timeout,
                proxy: None,
                by_proxy: self.params.by_proxy,
            },
        );
        // Fire-and-forget: the request records its own outcome.
        promise.defuse();
    }
}

async fn generate_loop(generator: Rc<RpsLoadGenerator>) -> anyhow::Result<()> {
    loop {
        let rps = generator.rps.get();
        if rps > 0.0 {
            generator
                .ctx
                .kernel()
                .sleep(Duration::from_secs_f64(1.0 / rps))
                .await;
            generator.fire_one();
        } else {
            generator
                .ctx
                .kernel()
                .sleep(Duration::from_millis(100))
                .await;
        }
    }
}

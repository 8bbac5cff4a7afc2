//! Computation-cost distributions.
//!
//! Costs are sampled in seconds from a lognormal (default) or normal
//! distribution parameterized by mean and standard deviation. The
//! lognormal is fitted so the *sampled values* have the configured
//! mean/std, not the underlying normal.

use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("lognormal requires mean > 0 and std >= 0, got mean={mean}, std={std}")]
    InvalidLogNormal { mean: f64, std: f64 },
    #[error("normal requires std >= 0, got std={std}")]
    InvalidNormal { std: f64 },
    #[error("unknown distribution kind '{0}' (expected 'lognormal' or 'normal')")]
    UnknownKind(String),
    #[error("bad duration '{0}': expected seconds or a millisecond suffix like '250m'")]
    BadDuration(String),
}

/// A sampleable cost distribution. Sampling draws from the run's seeded RNG.
#[derive(Debug, Clone)]
pub enum CostDistribution {
    LogNormal(LogNormal<f64>),
    Normal(Normal<f64>),
}

impl CostDistribution {
    /// Lognormal fitted to the given sample mean and standard deviation.
    pub fn lognormal(mean: f64, std: f64) -> Result<Self, DistributionError> {
        if mean <= 0.0 || std < 0.0 {
            return Err(DistributionError::InvalidLogNormal { mean, std });
        }
        let sigma_squared = (1.0 + (std * std) / (mean * mean)).ln();
        let sigma = sigma_squared.sqrt();
        let mu = mean.ln() - 0.5 * sigma_squared;
        let inner = LogNormal::new(mu, sigma)
            .map_err(|_| DistributionError::InvalidLogNormal { mean, std })?;
        Ok(CostDistribution::LogNormal(inner))
    }

    pub fn normal(mean: f64, std: f64) -> Result<Self, DistributionError> {
        let inner =
            Normal::new(mean, std).map_err(|_| DistributionError::InvalidNormal { std })?;
        Ok(CostDistribution::Normal(inner))
    }

    /// Draw one cost in seconds. Negative normal draws clamp to zero.
    pub fn sample(&self, rng: &mut SmallRng) -> f64 {
        let value = match self {
            CostDistribution::LogNormal(d) => d.sample(rng),
            CostDistribution::Normal(d) => d.sample(rng),
        };
        value.max(0.0)
    }
}

/// A scalar in configuration: a plain number (`0.25`) or a string with a
/// milli suffix (`"250m"` is 0.25). Durations read as seconds, cpu quotas
/// as cores.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Num(f64),
    Text(String),
}

impl Scalar {
    pub fn value(&self) -> Result<f64, DistributionError> {
        match self {
            Scalar::Num(s) => Ok(*s),
            Scalar::Text(text) => {
                if let Some(ms) = text.strip_suffix('m') {
                    ms.parse::<f64>()
                        .map(|v| v / 1000.0)
                        .map_err(|_| DistributionError::BadDuration(text.clone()))
                } else {
                    text.parse::<f64>()
                        .map_err(|_| DistributionError::BadDuration(text.clone()))
                }
            }
        }
    }
}

fn default_kind() -> String {
    "lognormal".to_string()
}

/// Declarative form of a cost distribution.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    pub mean: Scalar,
    #[serde(default = "DistributionConfig::zero_spec")]
    pub std: Scalar,
    /// `lognormal` (default) or `normal`.
    #[serde(default = "default_kind", rename = "dis")]
    pub kind: String,
}

impl DistributionConfig {
    fn zero_spec() -> Scalar {
        Scalar::Num(0.0)
    }

    /// A fixed-ish cost: lognormal with zero spread.
    pub fn fixed(mean_secs: f64) -> Self {
        DistributionConfig {
            mean: Scalar::Num(mean_secs),
            std: Scalar::Num(0.0),
            kind: default_kind(),
        }
    }

    pub fn build(&self) -> Result<CostDistribution, DistributionError> {
        let mean = self.mean.value()?;
        let std = self.std.value()?;
        match self.kind.as_str() {
            "lognormal" => CostDistribution::lognormal(mean, std),
            "normal" => CostDistribution::normal(mean, std),
            other => Err(DistributionError::UnknownKind(other.to_string())),
        }
    }
}

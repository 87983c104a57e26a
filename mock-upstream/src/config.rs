use serde::Deserialize;
use thiserror::Error;

const DEFAULT_MAX_LATENCY_MS: u64 = 1200;
const DEFAULT_SERVER_ERROR_RATE: f64 = 0.2;
const DEFAULT_RATE_LIMIT_RATE: f64 = 0.1;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },

    #[error("server_error_rate + rate_limit_rate must not exceed 1, got {0}")]
    RatesExceedOne(f64),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3100,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Fault injection knobs for the simulated upstream.
///
/// Each call sleeps a uniform delay in `[0, max_latency_ms)`, then fails with
/// HTTP 500 with probability `server_error_rate`, fails with HTTP 429 with
/// probability `rate_limit_rate`, and succeeds otherwise.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub max_latency_ms: u64,
    pub server_error_rate: f64,
    pub rate_limit_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            max_latency_ms: DEFAULT_MAX_LATENCY_MS,
            server_error_rate: DEFAULT_SERVER_ERROR_RATE,
            rate_limit_rate: DEFAULT_RATE_LIMIT_RATE,
        }
    }
}

impl SimulatorConfig {
    /// A simulator that answers immediately and never fails.
    pub fn reliable() -> Self {
        SimulatorConfig {
            max_latency_ms: 0,
            server_error_rate: 0.0,
            rate_limit_rate: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("server_error_rate", self.server_error_rate),
            ("rate_limit_rate", self.rate_limit_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::RateOutOfRange { name, value });
            }
        }

        let total = self.server_error_rate + self.rate_limit_rate;
        if total > 1.0 {
            return Err(ValidationError::RatesExceedOne(total));
        }

        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.simulator.validate()
    }
}

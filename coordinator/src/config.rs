use mock_upstream::config::{SimulatorConfig, ValidationError as SimulatorValidationError};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 200;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Expected token cannot be empty")]
    EmptyExpectedToken,

    #[error("Upstream timeout must be greater than 0")]
    ZeroTimeout,

    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("Invalid simulator config: {0}")]
    Simulator(#[from] SimulatorValidationError),
}

/// Coordinator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for coordination requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Validates the coordinator configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.auth.expected_token.is_empty() {
            return Err(ValidationError::EmptyExpectedToken);
        }

        self.upstream.validate()?;

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::ZeroMaxAttempts);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// The single token accepted by the auth check
    pub expected_token: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            expected_token: "valid-token".into(),
        }
    }
}

/// Where upstream attempts are sent.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamTarget {
    /// The in-process fault-injecting simulator
    Simulated { simulator: SimulatorConfig },
    /// A remote endpoint speaking the upstream wire contract
    Http { url: Url },
}

impl Default for UpstreamTarget {
    fn default() -> Self {
        UpstreamTarget::Simulated {
            simulator: SimulatorConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum UpstreamKind {
    #[default]
    Simulated,
    Http,
}

/// On-disk shape of the `upstream` section. `type` may be omitted and
/// defaults to the simulator.
#[derive(Deserialize)]
struct RawUpstreamConfig {
    #[serde(default, rename = "type")]
    kind: UpstreamKind,
    url: Option<Url>,
    simulator: Option<SimulatorConfig>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

impl TryFrom<RawUpstreamConfig> for UpstreamConfig {
    type Error = String;

    fn try_from(raw: RawUpstreamConfig) -> Result<Self, Self::Error> {
        let target = match (raw.kind, raw.url, raw.simulator) {
            (UpstreamKind::Simulated, None, simulator) => UpstreamTarget::Simulated {
                simulator: simulator.unwrap_or_default(),
            },
            (UpstreamKind::Simulated, Some(_), _) => {
                return Err("`url` is only valid for an http upstream".into());
            }
            (UpstreamKind::Http, Some(url), None) => UpstreamTarget::Http { url },
            (UpstreamKind::Http, None, _) => {
                return Err("`url` is required for an http upstream".into());
            }
            (UpstreamKind::Http, Some(_), Some(_)) => {
                return Err("`simulator` is only valid for a simulated upstream".into());
            }
        };

        Ok(UpstreamConfig {
            target,
            timeout_ms: raw.timeout_ms,
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "RawUpstreamConfig")]
pub struct UpstreamConfig {
    pub target: UpstreamTarget,
    /// Hard timeout applied to each attempt
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            target: UpstreamTarget::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        if let UpstreamTarget::Simulated { simulator } = &self.target {
            simulator.validate()?;
        }
        Ok(())
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Which failures the retry policy retries.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Every failure is retried, including terminal business errors
    #[default]
    AnyError,
    /// Only timeouts, transport failures, HTTP 429 and 5xx are retried
    TransientOnly,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            retry_on: RetryOn::AnyError,
        }
    }
}

//! Fault-injecting stand-in for the remote company API.

use crate::config::SimulatorConfig;
use http::StatusCode;
use rand::Rng;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};

pub const SUCCESS_CODE: &str = "0000";
pub const SERVER_ERROR_CODE: &str = "E500";
pub const RATE_LIMITED_CODE: &str = "E429";

/// Outcome draws are integers in `[0, ROLL_SCALE)`; rates apply in basis points.
pub const ROLL_SCALE: u32 = 10_000;

fn basis_points(rate: f64) -> u32 {
    (rate * f64::from(ROLL_SCALE)).round() as u32
}

/// What the simulated upstream answered: an HTTP status and a JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Clone, Debug)]
pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Simulator { config }
    }

    /// Sleeps a random latency, then answers according to a uniform draw.
    pub async fn simulate(&self, session_id: Option<&str>, idem: &str) -> SimulatedResponse {
        // Draw both values up front so the thread-local rng is never held across the sleep.
        let (latency, roll) = {
            let mut rng = rand::rng();
            let latency = match self.config.max_latency_ms {
                0 => 0,
                max => rng.random_range(0..max),
            };
            (latency, rng.random_range(0..ROLL_SCALE))
        };

        if latency > 0 {
            sleep(Duration::from_millis(latency)).await;
        }

        let response = self.decide(roll, session_id, idem);
        tracing::debug!(
            session_id,
            idem,
            latency_ms = latency,
            status = response.status.as_u16(),
            "Simulated upstream call"
        );
        response
    }

    /// Maps a draw in `[0, ROLL_SCALE)` to a response.
    pub fn decide(&self, roll: u32, session_id: Option<&str>, idem: &str) -> SimulatedResponse {
        let server_error_below = basis_points(self.config.server_error_rate);
        let rate_limited_below = server_error_below + basis_points(self.config.rate_limit_rate);

        if roll < server_error_below {
            SimulatedResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({ "code": SERVER_ERROR_CODE }),
            }
        } else if roll < rate_limited_below {
            SimulatedResponse {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: json!({ "code": RATE_LIMITED_CODE }),
            }
        } else {
            let mut data = json!({ "idem": idem });
            if let Some(session_id) = session_id {
                data["sessionId"] = json!(session_id);
            }
            SimulatedResponse {
                status: StatusCode::OK,
                body: json!({ "code": SUCCESS_CODE, "data": data }),
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(SimulatorConfig::default())
    }
}

use crate::outbound::UpstreamBody;
use http::StatusCode;
use serde_json::{Map, Value, json};

pub const AUTH_CODE: &str = "AUTH";
pub const AUTH_MESSAGE: &str = "invalid token";

/// Result of an execution, stored verbatim in the session for replay.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionResult {
    AuthRejected,
    UpstreamSuccess(UpstreamBody),
    /// All attempts failed; carries the last error's message.
    UpstreamFailure(String),
}

impl ExecutionResult {
    pub fn status(&self) -> StatusCode {
        match self {
            ExecutionResult::AuthRejected => StatusCode::UNAUTHORIZED,
            ExecutionResult::UpstreamSuccess(_) => StatusCode::OK,
            ExecutionResult::UpstreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::UpstreamSuccess(_))
    }

    /// The cached payload, without any delivery markers.
    fn payload(&self) -> Map<String, Value> {
        let value = match self {
            ExecutionResult::AuthRejected => json!({"code": AUTH_CODE, "message": AUTH_MESSAGE}),
            ExecutionResult::UpstreamSuccess(body) => match &body.data {
                Some(data) => json!({"code": body.code, "data": data}),
                None => json!({"code": body.code}),
            },
            ExecutionResult::UpstreamFailure(message) => json!({"ok": false, "error": message}),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// How a caller came to hold its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// This call ran the execution (or the auth check) itself.
    Fresh,
    /// Same fingerprint as the session's last result; answered from cache.
    Replayed,
    /// Attached to an execution already in flight for the session.
    Joined,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Fresh => "fresh",
            Delivery::Replayed => "replayed",
            Delivery::Joined => "joined",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub result: ExecutionResult,
    pub delivery: Delivery,
}

impl Outcome {
    pub fn new(result: ExecutionResult, delivery: Delivery) -> Self {
        Outcome { result, delivery }
    }

    /// Status always mirrors the underlying result, whatever the delivery.
    pub fn status(&self) -> StatusCode {
        self.result.status()
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        match self.delivery {
            Delivery::Replayed => {
                body.insert("reused".into(), Value::Bool(true));
            }
            Delivery::Joined => {
                body.insert("inflightReused".into(), Value::Bool(true));
            }
            Delivery::Fresh if self.result.is_success() => {
                body.insert("ok".into(), Value::Bool(true));
            }
            Delivery::Fresh => {}
        }
        body.extend(self.result.payload());
        Value::Object(body)
    }
}

//! Inbound coordination request and its format validation.

use crate::errors::CoordinatorError;
use serde::{Deserialize, Serialize};

const MIN_FIELD_LEN: usize = 3;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msisdn: Option<String>,
}

/// Body of `POST /api/async-test`.
///
/// Field order here does not matter for fingerprinting: the fingerprint is
/// computed over a canonical, key-sorted rendering of this struct.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationRequest {
    pub session_id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl CoordinationRequest {
    pub fn new<S, T>(session_id: S, token: T, payload: Option<Payload>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        CoordinationRequest {
            session_id: session_id.into(),
            token: token.into(),
            payload,
        }
    }

    /// Parses and validates a JSON request body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoordinatorError> {
        let request: CoordinationRequest = serde_json::from_slice(bytes)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        for (name, value) in [("sessionId", &self.session_id), ("token", &self.token)] {
            if value.chars().count() < MIN_FIELD_LEN {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "{name} must be at least {MIN_FIELD_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

//! Transports that carry a single attempt to the upstream company API.
//!
//! Transports only move bytes. Timeouts and classification of the answer are
//! the outbound caller's job, so every transport is judged by the same rules.

use crate::outbound::UpstreamError;
use crate::request::Payload;
use async_trait::async_trait;
use http::StatusCode;
use hyper::body::Bytes;
use mock_upstream::simulator::Simulator;
use serde::Serialize;
use url::Url;

pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// JSON body sent upstream.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequestBody {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    /// Sent as `X-Idempotency-Key` so retried attempts can be deduplicated upstream.
    pub idempotency_key: String,
    pub body: UpstreamRequestBody,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Calls the fault-injecting simulator in-process.
pub struct SimulatedUpstream {
    simulator: Simulator,
}

impl SimulatedUpstream {
    pub fn new(simulator: Simulator) -> Self {
        Self { simulator }
    }
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .simulator
            .simulate(Some(&request.body.session_id), &request.idempotency_key)
            .await;

        let body = serde_json::to_vec(&response.body)
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(UpstreamResponse {
            status: response.status,
            body: Bytes::from(body),
        })
    }
}

/// POSTs to a remote endpoint, e.g. a mock upstream running as its own process.
pub struct HttpUpstream {
    client: reqwest::Client,
    url: Url,
}

impl HttpUpstream {
    pub fn new(url: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpUpstream { client, url })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        self.url.host_str().unwrap_or(self.url.as_str())
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }
}

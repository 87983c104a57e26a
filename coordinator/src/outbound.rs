use crate::fingerprint::Fingerprint;
use crate::request::Payload;
use crate::upstream::{Upstream, UpstreamRequest, UpstreamRequestBody, UpstreamResponse};
use http::StatusCode;
use mock_upstream::simulator::SUCCESS_CODE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream responded with HTTP {0}")]
    HttpStatus(StatusCode),
    #[error("upstream responded with business code {0}")]
    Business(String),
    #[error("upstream response body is invalid: {0}")]
    InvalidBody(String),
}

impl UpstreamError {
    /// Transient failures may succeed on retry: timeouts, transport errors,
    /// rate limiting and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::HttpStatus(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            UpstreamError::Business(_) | UpstreamError::InvalidBody(_) => false,
        }
    }

    /// Short label used as a metric tag.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::HttpStatus(_) => "http_status",
            UpstreamError::Business(_) => "business",
            UpstreamError::InvalidBody(_) => "invalid_body",
        }
    }
}

/// Upstream response body: `{code, data?}`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UpstreamBody {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Issues one upstream attempt under a hard timeout and classifies the answer.
#[derive(Clone)]
pub struct OutboundCaller {
    upstream: Arc<dyn Upstream>,
    timeout: Duration,
}

impl OutboundCaller {
    pub fn new(upstream: Arc<dyn Upstream>, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub fn upstream_name(&self) -> &str {
        self.upstream.name()
    }

    pub async fn call(
        &self,
        session_id: &str,
        payload: Option<&Payload>,
        idem: &Fingerprint,
    ) -> Result<UpstreamBody, UpstreamError> {
        let request = UpstreamRequest {
            idempotency_key: idem.to_hex(),
            body: UpstreamRequestBody {
                session_id: session_id.to_string(),
                payload: payload.cloned(),
            },
        };

        // Dropping the send future on timeout cancels this attempt's I/O only
        let response = timeout(self.timeout, self.upstream.send(request))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        classify(response)
    }
}

fn classify(response: UpstreamResponse) -> Result<UpstreamBody, UpstreamError> {
    if !response.status.is_success() {
        return Err(UpstreamError::HttpStatus(response.status));
    }

    let body: UpstreamBody = serde_json::from_slice(&response.body)
        .map_err(|e| UpstreamError::InvalidBody(e.to_string()))?;

    if body.code != SUCCESS_CODE {
        return Err(UpstreamError::Business(body.code));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{Reply, ScriptedUpstream};
    use hyper::body::Bytes;
    use serde_json::json;

    fn fingerprint() -> Fingerprint {
        Fingerprint::of(&crate::request::CoordinationRequest::new(
            "sess-123",
            "valid-token",
            None,
        ))
        .unwrap()
    }

    fn response(status: StatusCode, body: &'static str) -> UpstreamResponse {
        UpstreamResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"code":"E500"}"#)),
            Err(UpstreamError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR))
        );
        assert_eq!(
            classify(response(StatusCode::TOO_MANY_REQUESTS, r#"{"code":"E429"}"#)),
            Err(UpstreamError::HttpStatus(StatusCode::TOO_MANY_REQUESTS))
        );
        assert_eq!(
            classify(response(StatusCode::OK, r#"{"code":"E429"}"#)),
            Err(UpstreamError::Business("E429".into()))
        );
        assert!(matches!(
            classify(response(StatusCode::OK, "<html>")),
            Err(UpstreamError::InvalidBody(_))
        ));
        assert_eq!(
            classify(response(
                StatusCode::OK,
                r#"{"code":"0000","data":{"idem":"x"}}"#
            )),
            Ok(UpstreamBody {
                code: "0000".into(),
                data: Some(json!({"idem": "x"})),
            })
        );
    }

    #[test]
    fn test_transient_classes() {
        assert!(UpstreamError::Timeout(Duration::from_secs(2)).is_transient());
        assert!(UpstreamError::Transport("refused".into()).is_transient());
        assert!(UpstreamError::HttpStatus(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(UpstreamError::HttpStatus(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!UpstreamError::HttpStatus(StatusCode::BAD_REQUEST).is_transient());
        assert!(!UpstreamError::Business("E999".into()).is_transient());
        assert!(!UpstreamError::InvalidBody("eof".into()).is_transient());
    }

    #[tokio::test]
    async fn test_call_sends_idempotency_key() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let caller = OutboundCaller::new(upstream.clone(), Duration::from_secs(2));
        let idem = fingerprint();

        let body = caller.call("sess-123", None, &idem).await.unwrap();
        assert_eq!(
            body.data,
            Some(json!({"sessionId": "sess-123", "idem": idem.to_hex()}))
        );
        assert_eq!(upstream.calls(), 1);
        assert_eq!(upstream.idempotency_keys(), vec![idem.to_hex()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let upstream =
            Arc::new(ScriptedUpstream::always(Reply::Echo).with_delay(Duration::from_secs(5)));
        let caller = OutboundCaller::new(upstream.clone(), Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let result = caller.call("sess-123", None, &fingerprint()).await;

        assert_eq!(result, Err(UpstreamError::Timeout(Duration::from_secs(2))));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(5));
        // The abandoned attempt is no longer running
        assert_eq!(upstream.active(), 0);
    }
}

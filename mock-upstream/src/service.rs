use crate::MockUpstreamError;
use crate::simulator::Simulator;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use shared::http::{make_boxed_error_response, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const MOCK_COMPANY_PATH: &str = "/api/mock-company";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MockCompanyRequest {
    session_id: Option<String>,
}

/// HTTP front for the [`Simulator`].
#[derive(Clone)]
pub struct MockUpstreamService {
    simulator: Arc<Simulator>,
}

impl MockUpstreamService {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator: Arc::new(simulator),
        }
    }

    pub async fn handle<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, MockUpstreamError>>, MockUpstreamError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        if req.method() != Method::POST || req.uri().path() != MOCK_COMPANY_PATH {
            return Ok(make_boxed_error_response(StatusCode::NOT_FOUND));
        }

        let idem = req
            .headers()
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none")
            .to_string();

        let bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| MockUpstreamError::RequestBodyError(e.to_string()))?
            .to_bytes();

        // An unreadable body is answered as if it carried no session id
        let body: MockCompanyRequest = serde_json::from_slice(&bytes).unwrap_or_default();

        let response = self
            .simulator
            .simulate(body.session_id.as_deref(), &idem)
            .await;

        Ok(make_json_response(response.status, &response.body)?)
    }
}

impl Service<Request<Incoming>> for MockUpstreamService {
    type Response = Response<BoxBody<Bytes, MockUpstreamError>>;
    type Error = MockUpstreamError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle(req).await })
    }
}

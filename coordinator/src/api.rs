use crate::errors::CoordinatorError;
use crate::request::CoordinationRequest;
use crate::session::Coordinator;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use shared::http::{make_boxed_error_response, make_json_response};
use std::future::Future;
use std::pin::Pin;

pub const COORDINATE_PATH: &str = "/api/async-test";
pub const RESET_PATH: &str = "/api/reset";

type CoordinatorResponse = Response<BoxBody<Bytes, CoordinatorError>>;

/// Public HTTP surface of the coordinator.
#[derive(Clone)]
pub struct CoordinatorService {
    coordinator: Coordinator,
}

impl CoordinatorService {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<CoordinatorResponse, CoordinatorError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        if req.method() != Method::POST {
            return Ok(make_boxed_error_response(StatusCode::NOT_FOUND));
        }

        match req.uri().path() {
            COORDINATE_PATH => match self.coordinate(req).await {
                Ok(response) => Ok(response),
                Err(e) => error_response(e),
            },
            RESET_PATH => {
                self.coordinator.reset();
                Ok(make_json_response(StatusCode::OK, &json!({"ok": true}))?)
            }
            _ => Ok(make_boxed_error_response(StatusCode::NOT_FOUND)),
        }
    }

    async fn coordinate<B>(&self, req: Request<B>) -> Result<CoordinatorResponse, CoordinatorError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| CoordinatorError::RequestBodyError(e.to_string()))?
            .to_bytes();

        let request = CoordinationRequest::from_slice(&bytes)?;
        let outcome = self.coordinator.handle(request).await?;

        Ok(make_json_response(outcome.status(), &outcome.to_json())?)
    }
}

fn error_response(error: CoordinatorError) -> Result<CoordinatorResponse, CoordinatorError> {
    let status = if error.is_input_error() {
        tracing::debug!(error = %error, "Rejected malformed request");
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %error, "Failed to handle request");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok(make_json_response(
        status,
        &json!({"ok": false, "error": error.to_string()}),
    )?)
}

impl Service<Request<Incoming>> for CoordinatorService {
    type Response = CoordinatorResponse;
    type Error = CoordinatorError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundCaller;
    use crate::retry::RetryPolicy;
    use crate::testutils::{Reply, ScriptedUpstream};
    use http_body_util::Full;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(upstream: &Arc<ScriptedUpstream>) -> CoordinatorService {
        CoordinatorService::new(Coordinator::new(
            OutboundCaller::new(upstream.clone(), Duration::from_secs(2)),
            RetryPolicy::default(),
            "valid-token",
        ))
    }

    fn post(path: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_json(response: CoordinatorResponse) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    const VALID: &str =
        r#"{"sessionId":"sess-123","token":"valid-token","payload":{"msisdn":"01012345678"}}"#;

    #[tokio::test]
    async fn test_coordinate_and_replay() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let service = service(&upstream);

        let response = service.handle(post(COORDINATE_PATH, VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let first = body_json(response).await;
        assert_eq!(first["ok"], json!(true));
        assert_eq!(first["code"], json!("0000"));
        assert_eq!(first["data"]["sessionId"], json!("sess-123"));
        assert_eq!(first["data"]["idem"].as_str().unwrap().len(), 64);

        let response = service.handle(post(COORDINATE_PATH, VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let second = body_json(response).await;
        assert_eq!(second["reused"], json!(true));
        assert_eq!(second["data"], first["data"]);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_token() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let response = service(&upstream)
            .handle(post(
                COORDINATE_PATH,
                r#"{"sessionId":"sess-123","token":"bad-token","payload":{"msisdn":"01012345678"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({"code": "AUTH", "message": "invalid token"})
        );
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_input_errors() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let service = service(&upstream);

        for body in [
            "not json",
            r#"{"token":"valid-token"}"#,
            r#"{"sessionId":"ab","token":"valid-token"}"#,
            r#"{"sessionId":"sess-123","token":"x"}"#,
        ] {
            let response = service.handle(post(COORDINATE_PATH, body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            let json = body_json(response).await;
            assert_eq!(json["ok"], json!(false));
            assert!(json["error"].is_string());
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let service = service(&upstream);

        service.handle(post(COORDINATE_PATH, VALID)).await.unwrap();

        let response = service.handle(post(RESET_PATH, "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"ok": true}));

        let response = service.handle(post(COORDINATE_PATH, VALID)).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], json!(true));
        assert!(json.get("reused").is_none());
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let upstream = Arc::new(ScriptedUpstream::always(Reply::Echo));
        let service = service(&upstream);

        let response = service.handle(post("/api/other", VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method(Method::GET)
            .uri(COORDINATE_PATH)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

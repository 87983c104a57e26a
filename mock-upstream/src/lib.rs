pub mod config;
pub mod service;
pub mod simulator;

use service::MockUpstreamService;
use shared::http::run_http_service;
use simulator::Simulator;

#[derive(thiserror::Error, Debug)]
pub enum MockUpstreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),
    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Config(#[from] config::ValidationError),
}

pub async fn run(config: config::Config) -> Result<(), MockUpstreamError> {
    config.validate()?;
    tracing::info!(simulator = ?config.simulator, "Starting mock upstream");
    let service = MockUpstreamService::new(Simulator::new(config.simulator));
    run_http_service(&config.listener.host, config.listener.port, service).await
}

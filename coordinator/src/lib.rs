pub mod api;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod metrics_defs;
pub mod outbound;
pub mod outcome;
pub mod request;
pub mod retry;
pub mod session;
pub mod upstream;

#[cfg(test)]
mod testutils;

use api::CoordinatorService;
use errors::CoordinatorError;
use session::Coordinator;
use shared::admin_service::AdminService;
use shared::http::run_http_service;

pub async fn run(config: config::Config) -> Result<(), CoordinatorError> {
    config.validate()?;

    let coordinator = Coordinator::from_config(&config)?;
    tracing::info!(
        upstream = ?config.upstream.target,
        timeout_ms = config.upstream.timeout_ms,
        max_attempts = config.retry.max_attempts,
        "Starting coordinator"
    );

    let coordinator_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        CoordinatorService::new(coordinator),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, CoordinatorError>::new(|| true),
    );

    tokio::try_join!(coordinator_task, admin_task)?;
    Ok(())
}

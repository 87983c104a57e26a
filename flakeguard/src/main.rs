mod config;

use clap::{Parser, Subcommand};
use config::{CommonConfig, Config, ConfigError, LoggingConfig, MetricsConfig};
use coordinator::errors::CoordinatorError;
use metrics_exporter_statsd::StatsdBuilder;
use mock_upstream::MockUpstreamError;
use shared::metrics_defs::{MetricDef, MetricType};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "flakeguard";

#[derive(Parser)]
#[command(version, about = "Idempotent, single-flight request coordination")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "flakeguard.yaml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the request coordinator
    Coordinator,
    /// Run the fault-injecting mock upstream
    MockUpstream,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing `{0}` section in config")]
    MissingSection(&'static str),
    #[error("failed to set up metrics: {0}")]
    Metrics(String),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    MockUpstream(#[from] MockUpstreamError),
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config_path.display());
            process::exit(1);
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());

    if let Err(e) = run(cli.command, config) {
        tracing::error!(error = %e, "Exiting");
        process::exit(1);
    }
}

fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    init_metrics(&config.common)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match command {
        CliCommand::Coordinator => {
            let coordinator_config = config
                .coordinator
                .ok_or(CliError::MissingSection("coordinator"))?;
            runtime.block_on(coordinator::run(coordinator_config))?;
        }
        CliCommand::MockUpstream => {
            let mock_config = config.mock_upstream.unwrap_or_default();
            runtime.block_on(mock_upstream::run(mock_config))?;
        }
    }

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = &common.metrics
    else {
        tracing::debug!("No metrics backend configured");
        return Ok(());
    };

    let recorder = StatsdBuilder::from(statsd_host.as_str(), *statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    describe_metrics(coordinator::metrics_defs::ALL_METRICS);
    tracing::info!(host = %statsd_host, port = statsd_port, "Reporting metrics to statsd");
    Ok(())
}

fn describe_metrics(defs: &[MetricDef]) {
    for def in defs {
        tracing::debug!(metric = def.name, kind = def.metric_type.as_str(), "Describing metric");
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

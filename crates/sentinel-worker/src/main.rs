//! Detection worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_ml::ModelLoader;
use sentinel_worker::{metrics, LogSink, StreamSupervisor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("sentinel=info".parse()?)
        .add_directive("ort=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting sentinel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_prometheus(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    let sources = config.source_ids().context("invalid SENTINEL_SOURCES")?;
    if sources.is_empty() {
        anyhow::bail!("no sources configured; set SENTINEL_SOURCES");
    }

    let loader = ModelLoader::new(config.model_config());
    let classifier = loader.load().await.context("failed to load classifier")?;

    let mut supervisor =
        StreamSupervisor::new(config.pipeline.clone(), classifier, Arc::new(LogSink))?;
    for source in sources {
        supervisor.start(source)?;
    }

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
    };

    let results = supervisor.run_until(shutdown, config.shutdown_timeout).await;
    let total = results.len();

    let mut failed = 0;
    for (source, result) in results {
        match result {
            Ok(report) => info!(
                source = %source,
                end_reason = %report.end_reason,
                alerts = report.alerts,
                "Stream report"
            ),
            Err(e) if e.is_configuration() => {
                error!(source = %source, error = %e, "Stream misconfigured");
                failed += 1;
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Stream failed");
                failed += 1;
            }
        }
    }

    info!(failed, total, "Worker shutdown complete");
    exit_status(failed, total)
}

/// The worker fails only when no stream ran to a report.
fn exit_status(failed: usize, total: usize) -> anyhow::Result<()> {
    if total > 0 && failed == total {
        anyhow::bail!("all {} streams failed", total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert!(exit_status(0, 3).is_ok());
        assert!(exit_status(2, 3).is_ok());
        assert!(exit_status(3, 3).is_err());
        assert!(exit_status(1, 1).is_err());
        assert!(exit_status(0, 0).is_ok());
    }
}

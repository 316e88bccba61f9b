//! Health Risk Pipeline - Main Entry Point
//!
//! Consumes prediction requests from NATS, scores them with the per-domain
//! artifacts, and publishes completed records or failures.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use health_risk_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, RequestConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    models::{ArtifactStore, Calibrator, FileArtifactRepository},
    producer::ResponseProducer,
    service::PredictionService,
    training::SyntheticLungTrainer,
    types::prediction::{PredictionRecord, PredictionResponse},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("health_risk_pipeline={}", logging.level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.toml".to_string());
    let config = AppConfig::load_from_path(&config_path)?;
    init_logging(&config.logging)?;

    info!(config = %config_path, "Starting Health Risk Pipeline");

    let metrics = Arc::new(PipelineMetrics::new());

    // Load artifacts for every domain
    let repository = Arc::new(FileArtifactRepository::with_threads(
        &config.artifacts.dir,
        config.artifacts.onnx_threads,
    ));
    let store = Arc::new(ArtifactStore::new(repository));
    let report = store.load_all();
    info!(
        loaded = ?report.loaded,
        dir = %config.artifacts.dir,
        "Artifact loading finished"
    );

    let missing: Vec<String> = config
        .domains
        .required()
        .filter(|d| !report.is_loaded(*d))
        .map(|d| {
            let reason = report
                .failure(d)
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not loaded".to_string());
            error!(domain = %d, reason = %reason, "Required artifacts unavailable");
            format!("{}: {}", d, reason)
        })
        .collect();
    if !missing.is_empty() {
        bail!("refusing to start without required artifacts ({})", missing.join("; "));
    }

    let calibrator = Calibrator::new(config.calibration.clamp_low_branch);
    if calibrator.clamps_low_branch() {
        info!("Calibration low branch is clamped");
    }

    let trainer = Arc::new(SyntheticLungTrainer::new(config.training.clone()));
    let service = Arc::new(
        PredictionService::new(Arc::clone(&store), config.domains.clone(), calibrator)
            .with_retrainer(trainer)
            .with_metrics(Arc::clone(&metrics)),
    );

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!(url = %config.nats.url, "Connected to NATS");

    let consumer = RequestConsumer::new(client.clone(), &config.nats.request_subject);
    let producer = Arc::new(ResponseProducer::new(client.clone(), &config.nats.result_subject));

    let num_workers = config.pipeline.workers.max(1);
    info!(
        workers = num_workers,
        requests = %consumer.subject(),
        results = %producer.subject(),
        "Starting request processing loop"
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    if config.pipeline.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(Arc::clone(&metrics), config.pipeline.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let service = Arc::clone(&service);
        let producer = Arc::clone(&producer);
        let processed_count = Arc::clone(&processed_count);

        tokio::spawn(async move {
            let request = match decode_request(&message.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize prediction request");
                    return;
                }
            };

            // Inference and a possible retrain are CPU-bound
            let scoring = {
                let service = Arc::clone(&service);
                let request = request.clone();
                tokio::task::spawn_blocking(move || service.predict(request.domain, &request.features))
            };

            let response = match scoring.await {
                Ok(Ok(result)) => {
                    debug!(
                        request_id = %request.request_id,
                        domain = %request.domain,
                        risk_percentage = result.risk_percentage,
                        category = %result.category,
                        "Request scored"
                    );
                    PredictionResponse::Completed(PredictionRecord::new(&request, result))
                }
                Ok(Err(e)) => {
                    warn!(
                        request_id = %request.request_id,
                        domain = %request.domain,
                        error = %e,
                        "Prediction failed"
                    );
                    PredictionResponse::failed(&request, &e)
                }
                Err(e) => {
                    error!(request_id = %request.request_id, error = %e, "Scoring task panicked");
                    service
                        .metrics()
                        .record_failure(PredictionResponse::INTERNAL_ERROR, Duration::ZERO);
                    PredictionResponse::internal_failure(&request)
                }
            };

            if let Err(e) = producer.publish(&response).await {
                error!(
                    request_id = %request.request_id,
                    error = %e,
                    "Failed to publish prediction response"
                );
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let stats = service.metrics().get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} req/s", service.metrics().get_throughput()),
                    avg_latency_us = stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}

//! Performance metrics and outcome counters for the prediction pipeline.

use crate::types::domain::Domain;
use crate::types::prediction::RiskCategory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_SAMPLES: usize = 10_000;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Predictions that produced a result
    pub predictions_completed: AtomicU64,
    /// Predictions that surfaced an error
    pub predictions_failed: AtomicU64,
    /// Retrain-and-retry cycles started
    pub retrains_triggered: AtomicU64,
    /// Retrains that produced and installed new artifacts
    pub retrains_succeeded: AtomicU64,
    /// Results by domain and category
    outcomes: RwLock<HashMap<(Domain, RiskCategory), u64>>,
    /// Failures by error kind
    failures_by_kind: RwLock<HashMap<&'static str, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            predictions_completed: AtomicU64::new(0),
            predictions_failed: AtomicU64::new(0),
            retrains_triggered: AtomicU64::new(0),
            retrains_succeeded: AtomicU64::new(0),
            outcomes: RwLock::new(HashMap::new()),
            failures_by_kind: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a completed prediction
    pub fn record_prediction(&self, domain: Domain, category: RiskCategory, processing_time: Duration) {
        self.predictions_completed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut outcomes) = self.outcomes.write() {
            *outcomes.entry((domain, category)).or_insert(0) += 1;
        }
        self.record_time(processing_time);
    }

    /// Record a failed prediction by its error kind
    pub fn record_failure(&self, kind: &'static str, processing_time: Duration) {
        self.predictions_failed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut failures) = self.failures_by_kind.write() {
            *failures.entry(kind).or_insert(0) += 1;
        }
        self.record_time(processing_time);
    }

    pub fn record_retrain(&self, succeeded: bool) {
        self.retrains_triggered.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.retrains_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_time(&self, processing_time: Duration) {
        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep the most recent half once full
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let total = self.predictions_completed.load(Ordering::Relaxed)
            + self.predictions_failed.load(Ordering::Relaxed);
        if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_outcomes(&self) -> HashMap<(Domain, RiskCategory), u64> {
        self.outcomes.read().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn get_failures_by_kind(&self) -> HashMap<&'static str, u64> {
        self.failures_by_kind
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let completed = self.predictions_completed.load(Ordering::Relaxed);
        let failed = self.predictions_failed.load(Ordering::Relaxed);
        let retrains = self.retrains_triggered.load(Ordering::Relaxed);
        let retrains_ok = self.retrains_succeeded.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();
        let outcomes = self.get_outcomes();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             HEALTH RISK PIPELINE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions: {:>8} ok / {:>6} failed │ {:>6.1} req/s       ║",
            completed,
            failed,
            self.get_throughput()
        );
        info!(
            "║ Retrains:    {:>8} triggered / {:>4} succeeded               ║",
            retrains, retrains_ok
        );
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        for domain in Domain::ALL {
            let counts: Vec<u64> = [RiskCategory::Low, RiskCategory::Moderate, RiskCategory::High]
                .iter()
                .map(|c| outcomes.get(&(domain, *c)).copied().unwrap_or(0))
                .collect();
            info!(
                "║ {:9} low={:>6} moderate={:>6} high={:>6}                ║",
                domain, counts[0], counts[1], counts[2]
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let failures = self.get_failures_by_kind();
        if !failures.is_empty() {
            info!("Failures by kind:");
            for (kind, count) in &failures {
                info!("  {}: {}", kind, count);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_prediction(Domain::Heart, RiskCategory::High, Duration::from_micros(100));
        metrics.record_prediction(Domain::Heart, RiskCategory::High, Duration::from_micros(300));
        metrics.record_prediction(Domain::Lung, RiskCategory::Low, Duration::from_micros(200));
        metrics.record_failure("inference_error", Duration::from_micros(50));
        metrics.record_retrain(true);
        metrics.record_retrain(false);

        assert_eq!(metrics.predictions_completed.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.predictions_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.retrains_triggered.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.retrains_succeeded.load(Ordering::Relaxed), 1);

        let outcomes = metrics.get_outcomes();
        assert_eq!(outcomes.get(&(Domain::Heart, RiskCategory::High)), Some(&2));
        assert_eq!(outcomes.get(&(Domain::Lung, RiskCategory::Low)), Some(&1));
        assert_eq!(metrics.get_failures_by_kind().get("inference_error"), Some(&1));
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.get_processing_stats().count, 0);

        for us in 1..=100 {
            metrics.record_failure("artifacts_unavailable", Duration::from_micros(us));
        }
        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.max_us, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.p99_us, 100);
    }
}

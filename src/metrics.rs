//! Prometheus metrics for clustering sessions and similarity search.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: OnceLock<Option<Arc<Metrics>>> = OnceLock::new();

/// Get or initialize the global metrics instance.
///
/// Returns `None` if the registry could not be built; callers skip recording.
pub fn get_metrics() -> Option<Arc<Metrics>> {
    METRICS
        .get_or_init(|| match Metrics::new() {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                tracing::warn!("Metrics disabled: {}", e);
                None
            }
        })
        .clone()
}

/// Run `f` against the global metrics, if available.
pub fn record(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = get_metrics() {
        f(metrics.as_ref());
    }
}

/// Latency buckets in seconds. Partitioning large sets can take minutes.
fn latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
    ]
}

pub struct Metrics {
    pub registry: Registry,

    // Counters
    pub sessions_started_total: IntCounter,
    pub sessions_completed_total: IntCounter,
    pub sessions_failed_total: IntCounter,
    pub fragments_claimed_total: IntCounter,
    pub fragments_released_total: IntCounter,
    pub clusters_persisted_total: IntCounter,
    pub units_committed_total: IntCounter,
    pub units_revoked_total: IntCounter,
    pub candidates_rejected_total: IntCounter,
    pub commit_conflicts_total: IntCounter,
    pub similarity_queries_total: IntCounter,

    // Gauges
    pub active_sessions: IntGauge,

    // Histograms (seconds)
    pub matrix_build_duration_seconds: Histogram,
    pub partition_duration_seconds: Histogram,
    pub synthesis_duration_seconds: Histogram,
    pub find_similar_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(format!("coalesce_{}", name), help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let sessions_started_total =
            counter("sessions_started_total", "Sessions moved to Running")?;
        let sessions_completed_total =
            counter("sessions_completed_total", "Sessions that completed")?;
        let sessions_failed_total = counter("sessions_failed_total", "Sessions that failed")?;
        let fragments_claimed_total =
            counter("fragments_claimed_total", "Fragments claimed by sessions")?;
        let fragments_released_total =
            counter("fragments_released_total", "Fragments released back to the pool")?;
        let clusters_persisted_total = counter("clusters_persisted_total", "Clusters persisted")?;
        let units_committed_total =
            counter("units_committed_total", "Knowledge units committed")?;
        let units_revoked_total = counter("units_revoked_total", "Knowledge units revoked")?;
        let candidates_rejected_total = counter(
            "candidates_rejected_total",
            "Synthesizer candidates rejected by validation",
        )?;
        let commit_conflicts_total = counter(
            "commit_conflicts_total",
            "Unit commits refused by the ownership check",
        )?;
        let similarity_queries_total =
            counter("similarity_queries_total", "find_similar calls")?;

        let active_sessions = IntGauge::new("coalesce_active_sessions", "Sessions in Running")?;
        registry.register(Box::new(active_sessions.clone()))?;

        let histogram = |name: &str, help: &str| -> prometheus::Result<Histogram> {
            let histogram = Histogram::with_opts(
                HistogramOpts::new(format!("coalesce_{}", name), help).buckets(latency_buckets()),
            )?;
            registry.register(Box::new(histogram.clone()))?;
            Ok(histogram)
        };
        let matrix_build_duration_seconds = histogram(
            "matrix_build_duration_seconds",
            "Distance matrix build duration in seconds",
        )?;
        let partition_duration_seconds = histogram(
            "partition_duration_seconds",
            "Partitioning duration in seconds",
        )?;
        let synthesis_duration_seconds = histogram(
            "synthesis_duration_seconds",
            "Synthesizer call duration per cluster in seconds",
        )?;
        let find_similar_duration_seconds = histogram(
            "find_similar_duration_seconds",
            "Similarity query duration in seconds",
        )?;

        Ok(Self {
            registry,
            sessions_started_total,
            sessions_completed_total,
            sessions_failed_total,
            fragments_claimed_total,
            fragments_released_total,
            clusters_persisted_total,
            units_committed_total,
            units_revoked_total,
            candidates_rejected_total,
            commit_conflicts_total,
            similarity_queries_total,
            active_sessions,
            matrix_build_duration_seconds,
            partition_duration_seconds,
            synthesis_duration_seconds,
            find_similar_duration_seconds,
        })
    }

    /// Export metrics in Prometheus text format.
    pub fn render(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Start a timer that records duration to a histogram when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl HistogramTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Timer on a global histogram, or `None` when metrics are disabled.
pub fn timer(select: impl FnOnce(&Metrics) -> &Histogram) -> Option<HistogramTimer> {
    get_metrics().map(|m| Metrics::start_timer(select(m.as_ref())))
}

use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Process-wide registry of execution metrics.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    operator_rows_in: CounterVec,
    operator_rows_out: CounterVec,
    operator_chunks_in: CounterVec,
    operator_chunks_out: CounterVec,
    operator_time_seconds: HistogramVec,
    aggregation_runs: CounterVec,
}

impl MetricsRegistry {
    /// Creates a registry with all metric families registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Records one operator invocation.
    #[allow(clippy::too_many_arguments)]
    pub fn record_operator(
        &self,
        query_id: &str,
        operator: &str,
        rows_in: u64,
        rows_out: u64,
        chunks_in: u64,
        chunks_out: u64,
        secs: f64,
    ) {
        let labels = [query_id, operator];
        self.inner
            .operator_rows_in
            .with_label_values(&labels)
            .inc_by(rows_in as f64);
        self.inner
            .operator_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .operator_chunks_in
            .with_label_values(&labels)
            .inc_by(chunks_in as f64);
        self.inner
            .operator_chunks_out
            .with_label_values(&labels)
            .inc_by(chunks_out as f64);
        self.inner
            .operator_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    /// Records the number of equal-key runs an aggregation reduced.
    pub fn record_aggregation_runs(&self, query_id: &str, runs: u64) {
        self.inner
            .aggregation_runs
            .with_label_values(&[query_id])
            .inc_by(runs as f64);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let operator_rows_in = counter_vec(
            &registry,
            "quiver_operator_rows_in_total",
            "Rows consumed by an operator",
            &["query_id", "operator"],
        );
        let operator_rows_out = counter_vec(
            &registry,
            "quiver_operator_rows_out_total",
            "Rows produced by an operator",
            &["query_id", "operator"],
        );
        let operator_chunks_in = counter_vec(
            &registry,
            "quiver_operator_chunks_in_total",
            "Chunks consumed by an operator",
            &["query_id", "operator"],
        );
        let operator_chunks_out = counter_vec(
            &registry,
            "quiver_operator_chunks_out_total",
            "Chunks produced by an operator",
            &["query_id", "operator"],
        );
        let operator_time_seconds = histogram_vec(
            &registry,
            "quiver_operator_time_seconds",
            "Operator wall time",
            &["query_id", "operator"],
        );
        let aggregation_runs = counter_vec(
            &registry,
            "quiver_aggregation_runs_total",
            "Equal-key runs reduced by aggregations",
            &["query_id"],
        );

        Self {
            registry,
            operator_rows_in,
            operator_rows_out,
            operator_chunks_in,
            operator_chunks_out,
            operator_time_seconds,
            aggregation_runs,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// The process-wide metrics registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

use prometheus::{Counter, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static::lazy_static! {
    // Pipeline throughput
    pub static ref RECORDS_ANALYZED: Counter = Counter::with_opts(
        Opts::new("digest_records_analyzed_total", "Total number of message records analyzed")
    ).unwrap();

    pub static ref BATCHES_SUMMARIZED: Counter = Counter::with_opts(
        Opts::new("digest_batches_summarized_total", "Total number of batches summarized successfully")
    ).unwrap();

    pub static ref BATCHES_FAILED: Counter = Counter::with_opts(
        Opts::new("digest_batches_failed_total", "Total number of batches that exhausted retries")
    ).unwrap();

    pub static ref LLM_RETRIES: Counter = Counter::with_opts(
        Opts::new("digest_llm_retries_total", "Total number of retried LLM calls")
    ).unwrap();

    pub static ref LLM_TOKENS_USED: Counter = Counter::with_opts(
        Opts::new("digest_llm_tokens_used_total", "Total billed tokens across all LLM calls")
    ).unwrap();

    // Latency
    pub static ref LLM_REQUEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("digest_llm_request_duration_seconds", "Time spent on LLM completion calls")
    ).unwrap();

    pub static ref GAMMA_GENERATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("digest_gamma_generation_duration_seconds", "Time from slide-generation submit to terminal status")
    ).unwrap();

    pub static ref GAMMA_POLLS: Counter = Counter::with_opts(
        Opts::new("digest_gamma_polls_total", "Total number of slide-generation status polls")
    ).unwrap();
}

/// Registers the pipeline's metrics and renders them in the Prometheus
/// text format. Exposition (HTTP endpoint, push gateway, log dump) is the
/// embedding application's concern; this crate only collects.
pub struct MetricsRegistry {
    registry: Registry,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        registry.register(Box::new(RECORDS_ANALYZED.clone())).unwrap();
        registry.register(Box::new(BATCHES_SUMMARIZED.clone())).unwrap();
        registry.register(Box::new(BATCHES_FAILED.clone())).unwrap();
        registry.register(Box::new(LLM_RETRIES.clone())).unwrap();
        registry.register(Box::new(LLM_TOKENS_USED.clone())).unwrap();
        registry.register(Box::new(LLM_REQUEST_DURATION.clone())).unwrap();
        registry.register(Box::new(GAMMA_GENERATION_DURATION.clone())).unwrap();
        registry.register(Box::new(GAMMA_POLLS.clone())).unwrap();

        Self { registry }
    }

    pub fn gather_metrics(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&metric_families).unwrap_or_else(|e| {
            error!("Failed to encode metrics: {}", e);
            String::new()
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Observability surface (SPEC_FULL §10.E), completing the teacher's
//! dangling `#[cfg(feature = "prometheus")] pub mod metrics;` reference
//! with real counters registered against the `prometheus` crate.

use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub cache_status: IntCounterVec,
    pub transforms_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub fallbacks_total: IntCounterVec,
    pub stage_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cache_status = IntCounterVec::new(
            Opts::new("gateway_cache_requests_total", "Cache outcome per request"),
            &["status"],
        )
        .expect("metric");
        let transforms_total = IntCounterVec::new(
            Opts::new("gateway_transforms_total", "Backend transformation invocations"),
            &["outcome"],
        )
        .expect("metric");
        let errors_total = IntCounterVec::new(
            Opts::new("gateway_errors_total", "Errors returned to clients"),
            &["error_type"],
        )
        .expect("metric");
        let fallbacks_total = IntCounterVec::new(
            Opts::new("gateway_fallbacks_total", "Fallback-to-origin responses"),
            &["reason"],
        )
        .expect("metric");
        let stage_duration = HistogramVec::new(
            prometheus::HistogramOpts::new("gateway_stage_duration_seconds", "Per-stage pipeline latency"),
            &["stage"],
        )
        .expect("metric");

        registry.register(Box::new(cache_status.clone())).expect("register");
        registry.register(Box::new(transforms_total.clone())).expect("register");
        registry.register(Box::new(errors_total.clone())).expect("register");
        registry.register(Box::new(fallbacks_total.clone())).expect("register");
        registry.register(Box::new(stage_duration.clone())).expect("register");

        Self { registry, cache_status, transforms_total, errors_total, fallbacks_total, stage_duration }
    }

    pub fn encode(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf).expect("encode");
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_encode() {
        let m = Metrics::new();
        m.cache_status.with_label_values(&["hit"]).inc();
        m.errors_total.with_label_values(&["ORIGIN_NOT_FOUND"]).inc();
        let text = m.encode();
        assert!(text.contains("gateway_cache_requests_total"));
        assert!(text.contains("gateway_errors_total"));
    }
}

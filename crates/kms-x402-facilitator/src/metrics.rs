use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Facilitator metrics, registered in their own [`Registry`].
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Verify requests by `result` (valid, invalid, bad_request).
    pub verify_requests: IntCounterVec,
    /// Settle requests by `status` (confirmed, failed, unknown, bad_request).
    pub settle_requests: IntCounterVec,
    pub settle_latency: HistogramVec,
    /// 1 when the facilitator's native balance on `network` is below the threshold.
    pub balance_low: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let verify_requests = IntCounterVec::new(
            Opts::new("x402_facilitator_verify_total", "Total verification requests"),
            &["result"],
        )?;
        let settle_requests = IntCounterVec::new(
            Opts::new("x402_facilitator_settle_total", "Total settlement requests"),
            &["status"],
        )?;
        let settle_latency = HistogramVec::new(
            HistogramOpts::new(
                "x402_facilitator_settle_duration_seconds",
                "Settlement latency in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["status"],
        )?;
        let balance_low = IntGaugeVec::new(
            Opts::new(
                "x402_facilitator_balance_low",
                "Facilitator native balance below operating threshold",
            ),
            &["network"],
        )?;

        registry.register(Box::new(verify_requests.clone()))?;
        registry.register(Box::new(settle_requests.clone()))?;
        registry.register(Box::new(settle_latency.clone()))?;
        registry.register(Box::new(balance_low.clone()))?;

        Ok(Self {
            registry,
            verify_requests,
            settle_requests,
            settle_latency,
            balance_low,
        })
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_samples() {
        let metrics = Metrics::new().unwrap();
        metrics.verify_requests.with_label_values(&["valid"]).inc();
        metrics
            .settle_latency
            .with_label_values(&["confirmed"])
            .observe(1.5);

        let text = metrics.render();
        assert!(text.contains("x402_facilitator_verify_total{result=\"valid\"} 1"));
        assert!(text.contains("x402_facilitator_settle_duration_seconds_count{status=\"confirmed\"} 1"));
    }

    #[test]
    fn instances_do_not_share_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.verify_requests.with_label_values(&["invalid"]).inc();
        assert!(!b.render().contains("result=\"invalid\""));
    }
}

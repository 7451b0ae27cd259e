//! # Prometheus Metrics
//!
//! Gate and registration counters, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] with the
//! `tollgate` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use tollgate_core::gate::QuotaDecision;

/// Metric handles for the node. Cheap to clone.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Gate answers, labelled by `gate` (query/transaction), `outcome`
    /// (allow/deny) and `reason` (rejection code, empty on allow).
    pub gate_decisions_total: IntCounterVec,
    pub queries_recorded_total: IntCounter,
    pub identities_registered_total: IntCounter,
    pub wallets_linked_total: IntCounter,
    /// Time spent inside a gate check, including store reads.
    pub gate_latency_seconds: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tollgate".into()), None)?;

        let gate_decisions_total = IntCounterVec::new(
            Opts::new("gate_decisions_total", "Quota gate decisions"),
            &["gate", "outcome", "reason"],
        )?;
        registry.register(Box::new(gate_decisions_total.clone()))?;

        let queries_recorded_total = IntCounter::new(
            "queries_recorded_total",
            "Queries charged against a monthly quota",
        )?;
        registry.register(Box::new(queries_recorded_total.clone()))?;

        let identities_registered_total = IntCounter::new(
            "identities_registered_total",
            "Primary identities created",
        )?;
        registry.register(Box::new(identities_registered_total.clone()))?;

        let wallets_linked_total =
            IntCounter::new("wallets_linked_total", "Wallets linked under a primary")?;
        registry.register(Box::new(wallets_linked_total.clone()))?;

        let gate_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("gate_latency_seconds", "Quota gate latency in seconds").buckets(
                vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25],
            ),
        )?;
        registry.register(Box::new(gate_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            gate_decisions_total,
            queries_recorded_total,
            identities_registered_total,
            wallets_linked_total,
            gate_latency_seconds,
        })
    }

    pub fn observe_decision(&self, gate: &str, decision: &QuotaDecision) {
        let (outcome, reason) = match decision.reason() {
            None => ("allow", ""),
            Some(code) => ("deny", code.as_str()),
        };
        self.gate_decisions_total
            .with_label_values(&[gate, outcome, reason])
            .inc();
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

//! Prometheus-backed metrics registry and snapshot helpers.

use std::sync::Arc;

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    core::Collector,
};
use serde::Serialize;

use crate::error::{MetricStage, Result, TelemetryError};

/// Outcome label for range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Served,
    NotSatisfiable,
    Aborted,
}

impl RangeOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Served => "served",
            Self::NotSatisfiable => "not_satisfiable",
            Self::Aborted => "aborted",
        }
    }
}

/// Prometheus-backed metrics registry shared across the engine.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    range_requests_total: IntCounterVec,
    bytes_served_total: IntCounter,
    adapters_created_total: IntCounter,
    active_sessions: IntGauge,
    waiting_readers: IntGauge,
}

/// Point-in-time view used by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: i64,
    pub waiting_readers: i64,
    pub adapters_created_total: u64,
    pub bytes_served_total: u64,
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = register(
            &registry,
            "reel_http_requests_total",
            IntCounterVec::new(
                Opts::new("reel_http_requests_total", "Total HTTP requests received"),
                &["route", "code"],
            ),
        )?;
        let range_requests_total = register(
            &registry,
            "reel_range_requests_total",
            IntCounterVec::new(
                Opts::new(
                    "reel_range_requests_total",
                    "Range requests against session files by outcome",
                ),
                &["outcome"],
            ),
        )?;
        let bytes_served_total = register(
            &registry,
            "reel_bytes_served_total",
            IntCounter::with_opts(Opts::new(
                "reel_bytes_served_total",
                "Body bytes written by the range streamer",
            )),
        )?;
        let adapters_created_total = register(
            &registry,
            "reel_adapters_created_total",
            IntCounter::with_opts(Opts::new(
                "reel_adapters_created_total",
                "Swarm adapters constructed",
            )),
        )?;
        let active_sessions = register(
            &registry,
            "reel_active_sessions",
            IntGauge::with_opts(Opts::new(
                "reel_active_sessions",
                "Sessions currently holding a live adapter",
            )),
        )?;
        let waiting_readers = register(
            &registry,
            "reel_waiting_readers",
            IntGauge::with_opts(Opts::new(
                "reel_waiting_readers",
                "Range responses currently streaming",
            )),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                range_requests_total,
                bytes_served_total,
                adapters_created_total,
                active_sessions,
                waiting_readers,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    pub fn inc_range_request(&self, outcome: RangeOutcome) {
        self.inner
            .range_requests_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn add_bytes_served(&self, bytes: u64) {
        self.inner.bytes_served_total.inc_by(bytes);
    }

    pub fn inc_adapters_created(&self) {
        self.inner.adapters_created_total.inc();
    }

    pub fn set_active_sessions(&self, count: i64) {
        self.inner.active_sessions.set(count);
    }

    pub fn reader_started(&self) {
        self.inner.waiting_readers.inc();
    }

    pub fn reader_finished(&self) {
        self.inner.waiting_readers.dec();
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::ExpositionEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionUtf8 { source })
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.inner.active_sessions.get(),
            waiting_readers: self.inner.waiting_readers.get(),
            adapters_created_total: self.inner.adapters_created_total.get(),
            bytes_served_total: self.inner.bytes_served_total.get(),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector = collector.map_err(|source| TelemetryError::Metric {
        name,
        stage: MetricStage::Build,
        source,
    })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: MetricStage::Register,
            source,
        })?;
    Ok(collector)
}

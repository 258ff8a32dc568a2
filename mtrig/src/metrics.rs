//! Metrics module for Prometheus integration

use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector for the change stream watchers
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    running_watchers: Arc<Gauge>,
    watchers_started: Arc<Counter>,
    events_delivered: Arc<CounterVec>,
    decode_failures: Arc<CounterVec>,
    watcher_failures: Arc<CounterVec>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let running_watchers = Arc::new(
            Gauge::with_opts(Opts::new(
                "mtrig_running_watchers",
                "Number of change stream watchers currently running",
            ))
            .expect("Failed to create running_watchers gauge"),
        );

        let watchers_started = Arc::new(
            Counter::with_opts(Opts::new(
                "mtrig_watchers_started_total",
                "Total number of watchers started since startup",
            ))
            .expect("Failed to create watchers_started counter"),
        );

        let events_delivered = Arc::new(
            CounterVec::new(
                Opts::new(
                    "mtrig_events_delivered_total",
                    "Total number of change events handed to the callback",
                ),
                &["operation"],
            )
            .expect("Failed to create events_delivered counter"),
        );

        let decode_failures = Arc::new(
            CounterVec::new(
                Opts::new(
                    "mtrig_decode_failures_total",
                    "Total number of change records skipped because they could not be decoded",
                ),
                &["operation"],
            )
            .expect("Failed to create decode_failures counter"),
        );

        // Watchers are never restarted, so each increment is a lost watcher
        let watcher_failures = Arc::new(
            CounterVec::new(
                Opts::new(
                    "mtrig_watcher_failures_total",
                    "Total number of watchers terminated by an error",
                ),
                &["operation", "error_type"],
            )
            .expect("Failed to create watcher_failures counter"),
        );

        registry
            .register(Box::new((*running_watchers).clone()))
            .expect("Failed to register running_watchers metric");
        registry
            .register(Box::new((*watchers_started).clone()))
            .expect("Failed to register watchers_started metric");
        registry
            .register(Box::new((*events_delivered).clone()))
            .expect("Failed to register events_delivered metric");
        registry
            .register(Box::new((*decode_failures).clone()))
            .expect("Failed to register decode_failures metric");
        registry
            .register(Box::new((*watcher_failures).clone()))
            .expect("Failed to register watcher_failures metric");

        Self {
            registry,
            running_watchers,
            watchers_started,
            events_delivered,
            decode_failures,
            watcher_failures,
        }
    }

    /// Set the number of running watchers
    pub fn set_running_watchers(&self, count: usize) {
        self.running_watchers.set(count as f64);
    }

    /// Record a watcher start
    pub fn record_watcher_start(&self) {
        self.watchers_started.inc();
    }

    pub fn record_event_delivered(&self, operation: &str) {
        self.events_delivered.with_label_values(&[operation]).inc();
    }

    pub fn record_decode_failure(&self, operation: &str) {
        self.decode_failures.with_label_values(&[operation]).inc();
    }

    /// Record a watcher that ended with an error
    pub fn record_watcher_failure(&self, operation: &str, error_type: &str) {
        self.watcher_failures
            .with_label_values(&[operation, error_type])
            .inc();
    }

    pub fn running_watchers(&self) -> usize {
        self.running_watchers.get() as usize
    }

    pub fn watchers_started(&self) -> u64 {
        self.watchers_started.get() as u64
    }

    pub fn events_delivered(&self, operation: &str) -> u64 {
        self.events_delivered.with_label_values(&[operation]).get() as u64
    }

    pub fn decode_failures(&self, operation: &str) -> u64 {
        self.decode_failures.with_label_values(&[operation]).get() as u64
    }

    pub fn watcher_failures(&self, operation: &str, error_type: &str) -> u64 {
        self.watcher_failures
            .with_label_values(&[operation, error_type])
            .get() as u64
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

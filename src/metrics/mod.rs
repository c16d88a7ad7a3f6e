// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Command outcomes per command name
// - Concurrency conflicts and rolled back transactions
// - Outbox deliveries (published, failed, dead-lettered)
// - Circuit breaker state transitions
//
// All metrics are registered with one Registry and scraped via /metrics
// ============================================================================

/// Central metrics registry for the ledger
pub struct Metrics {
    registry: Registry,

    // Command Metrics
    pub commands_total: IntCounterVec,
    pub concurrency_conflicts: IntCounterVec,
    pub transactions_rolled_back: IntCounter,

    // Outbox Metrics
    pub outbox_published: IntCounterVec,
    pub outbox_failed: IntCounterVec,
    pub outbox_dead_lettered: IntCounterVec,
    pub outbox_delivery_duration: HistogramVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("ledger_commands_total", "Account commands by name and outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let concurrency_conflicts = IntCounterVec::new(
            Opts::new("ledger_concurrency_conflicts_total", "Optimistic lock failures"),
            &["command"],
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let transactions_rolled_back = IntCounter::new(
            "ledger_transactions_rolled_back_total",
            "Multi-stream commits undone by compensation",
        )?;
        registry.register(Box::new(transactions_rolled_back.clone()))?;

        // Outbox Metrics
        let outbox_published = IntCounterVec::new(
            Opts::new("outbox_published_total", "Outbox records delivered"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_published.clone()))?;

        let outbox_failed = IntCounterVec::new(
            Opts::new("outbox_failed_total", "Outbox delivery attempts that failed"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_failed.clone()))?;

        let outbox_dead_lettered = IntCounterVec::new(
            Opts::new("outbox_dead_lettered_total", "Outbox records parked as dead letters"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_dead_lettered.clone()))?;

        let outbox_delivery_duration = HistogramVec::new(
            HistogramOpts::new("outbox_delivery_duration_seconds", "Outbox delivery attempt duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_delivery_duration.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            concurrency_conflicts,
            transactions_rolled_back,
            outbox_published,
            outbox_failed,
            outbox_dead_lettered,
            outbox_delivery_duration,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_command(&self, command: &str, outcome: &str) {
        self.commands_total.with_label_values(&[command, outcome]).inc();
    }

    pub fn record_conflict(&self, command: &str) {
        self.concurrency_conflicts.with_label_values(&[command]).inc();
    }

    pub fn record_rollback(&self) {
        self.transactions_rolled_back.inc();
    }

    /// Outcome of one outbox delivery attempt
    pub fn record_delivery(&self, event_type: &str, duration_secs: f64, success: bool) {
        if success {
            self.outbox_published.with_label_values(&[event_type]).inc();
        } else {
            self.outbox_failed.with_label_values(&[event_type]).inc();
        }
        self.outbox_delivery_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_dead_letter(&self, event_type: &str) {
        self.outbox_dead_lettered.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
    }
}

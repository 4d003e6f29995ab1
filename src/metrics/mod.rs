// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Orders and reserved line items
// - Rejections (per operation and failure kind, stock shortfalls per item kind)
// - Master assignments and ratings
// - Operation latency, retry attempts and outcomes
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Metrics
    pub orders_created: IntCounter,
    pub order_line_items: IntCounterVec,
    pub stock_rejections: IntCounterVec,

    // Master Metrics
    pub masters_assigned: IntCounter,
    pub ratings_recorded: IntCounter,

    // Operation Metrics
    pub operation_failures: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Order Metrics
        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let order_line_items = IntCounterVec::new(
            Opts::new("order_line_items_total", "Total line items reserved in created orders"),
            &["item_kind"],
        )?;
        registry.register(Box::new(order_line_items.clone()))?;

        let stock_rejections = IntCounterVec::new(
            Opts::new("stock_rejections_total", "Orders rejected for insufficient stock"),
            &["item_kind"],
        )?;
        registry.register(Box::new(stock_rejections.clone()))?;

        // Master Metrics
        let masters_assigned = IntCounter::new(
            "masters_assigned_total",
            "Total masters attached to orders",
        )?;
        registry.register(Box::new(masters_assigned.clone()))?;

        let ratings_recorded = IntCounter::new(
            "ratings_recorded_total",
            "Total master ratings recorded",
        )?;
        registry.register(Box::new(ratings_recorded.clone()))?;

        // Operation Metrics
        let operation_failures = IntCounterVec::new(
            Opts::new("operation_failures_total", "Operations that returned an error"),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(operation_failures.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Operation duration including retries")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Operations that succeeded after a retry"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            order_line_items,
            stock_rejections,
            masters_assigned,
            ratings_recorded,
            operation_failures,
            operation_duration,
            retry_attempts_total,
            retry_success,
            retry_failure,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_created(&self, products: usize, companion_tools: usize, tools: usize) {
        self.orders_created.inc();
        for (kind, count) in [
            ("product", products),
            ("companion_tool", companion_tools),
            ("tool", tools),
        ] {
            self.order_line_items
                .with_label_values(&[kind])
                .inc_by(count as u64);
        }
    }

    pub fn record_stock_rejection(&self, item_kind: &str) {
        self.stock_rejections.with_label_values(&[item_kind]).inc();
    }

    pub fn record_masters_assigned(&self, count: usize) {
        self.masters_assigned.inc_by(count as u64);
    }

    pub fn record_rating(&self) {
        self.ratings_recorded.inc();
    }

    /// Helper to record the outcome of one service operation
    pub fn record_operation(&self, operation: &str, duration_secs: f64, failure: Option<&str>) {
        if let Some(reason) = failure {
            self.operation_failures
                .with_label_values(&[operation, reason])
                .inc();
        }
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    /// Helper to record retry outcome
    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }
}

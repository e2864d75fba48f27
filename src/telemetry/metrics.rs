//! Metrics
//!
//! Token lifecycle metrics interfaces and implementations.

use std::collections::HashMap;
use std::sync::Mutex;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Token lifecycle metrics interface.
pub trait TokenMetrics: Send + Sync {
    /// A caller started a new refresh.
    fn record_refresh_started(&self);

    /// A caller joined a refresh already in flight.
    fn record_refresh_joined(&self);

    /// A refresh settled.
    fn record_refresh_result(&self, outcome: &str);

    /// A server-side revocation was attempted.
    fn record_revocation(&self, success: bool);

    /// Local token state was cleared.
    fn record_tokens_cleared(&self);

    /// A storage operation failed.
    fn record_storage_error(&self, operation: &str);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl TokenMetrics for NoOpMetrics {
    fn record_refresh_started(&self) {}
    fn record_refresh_joined(&self) {}
    fn record_refresh_result(&self, _outcome: &str) {}
    fn record_revocation(&self, _success: bool) {}
    fn record_tokens_cleared(&self) {}
    fn record_storage_error(&self, _operation: &str) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

/// In-memory metrics for testing.
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of entries recorded under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.get_entries_by_name(name).len()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn record(&self, name: &str, labels: MetricLabels) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.entries.lock().unwrap().push(MetricEntry {
            name: name.to_string(),
            value: 1.0,
            labels,
            timestamp: now,
        });
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenMetrics for InMemoryMetrics {
    fn record_refresh_started(&self) {
        self.record("token_refreshes_started_total", MetricLabels::new());
    }

    fn record_refresh_joined(&self) {
        self.record("token_refreshes_joined_total", MetricLabels::new());
    }

    fn record_refresh_result(&self, outcome: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("outcome".to_string(), outcome.to_string());
        self.record("token_refresh_results_total", labels);
    }

    fn record_revocation(&self, success: bool) {
        let mut labels = MetricLabels::new();
        labels.insert("success".to_string(), success.to_string());
        self.record("token_revocations_total", labels);
    }

    fn record_tokens_cleared(&self) {
        self.record("token_clears_total", MetricLabels::new());
    }

    fn record_storage_error(&self, operation: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("operation".to_string(), operation.to_string());
        self.record("token_storage_errors_total", labels);
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}

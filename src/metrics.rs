//! Metrics and observability for soma_import

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::events::{ImportEvent, ImportListener, ListenerError};

/// Process-wide import counters
#[derive(Debug, Default)]
pub struct ImportMetrics {
    pub imports_started: AtomicU64,
    pub imports_succeeded: AtomicU64,
    pub imports_failed: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-phase counters
    pub collections: AtomicU64,
    pub conversions: AtomicU64,
    pub children_registered: AtomicU64,
}

impl ImportMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_import(&self, success: bool, latency_ms: u64) {
        if success {
            self.imports_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.imports_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let started = self.imports_started.load(Ordering::Relaxed);
        let succeeded = self.imports_succeeded.load(Ordering::Relaxed);
        let failed = self.imports_failed.load(Ordering::Relaxed);
        let finished = succeeded + failed;
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            imports_started: started,
            imports_succeeded: succeeded,
            imports_failed: failed,
            error_rate: if finished > 0 { failed as f64 / finished as f64 } else { 0.0 },
            avg_latency_ms: if finished > 0 { total_latency / finished } else { 0 },
            phases: PhaseMetrics {
                collections: self.collections.load(Ordering::Relaxed),
                conversions: self.conversions.load(Ordering::Relaxed),
                children_registered: self.children_registered.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub imports_started: u64,
    pub imports_succeeded: u64,
    pub imports_failed: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub phases: PhaseMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub collections: u64,
    pub conversions: u64,
    pub children_registered: u64,
}

/// Timer for tracking import latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds [`ImportMetrics`] from the event stream of one run.
pub struct MetricsListener {
    metrics: Arc<ImportMetrics>,
    timer: Mutex<Option<Timer>>,
}

impl MetricsListener {
    pub fn new(metrics: Arc<ImportMetrics>) -> Self {
        Self {
            metrics,
            timer: Mutex::default(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.timer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .map_or(0, |timer| timer.elapsed_ms())
    }
}

impl ImportListener for MetricsListener {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &ImportEvent) -> Result<(), ListenerError> {
        match event {
            ImportEvent::StartDataExtraction { .. } => {
                self.metrics.imports_started.fetch_add(1, Ordering::Relaxed);
                *self.timer.lock().unwrap_or_else(|p| p.into_inner()) = Some(Timer::new());
            }
            ImportEvent::EndUnpacking {
                is_collection: true,
                ..
            } => {
                self.metrics.collections.fetch_add(1, Ordering::Relaxed);
            }
            ImportEvent::EndConversion { .. } => {
                self.metrics.conversions.fetch_add(1, Ordering::Relaxed);
            }
            ImportEvent::RegisterFile { .. } => {
                self.metrics.children_registered.fetch_add(1, Ordering::Relaxed);
            }
            ImportEvent::EndSuccessfulImport { .. } => {
                self.metrics.record_import(true, self.elapsed_ms());
            }
            ImportEvent::FileError { .. } => {
                self.metrics.record_import(false, self.elapsed_ms());
            }
            other => return Err(ListenerError::Unhandled(other.kind())),
        }
        Ok(())
    }
}

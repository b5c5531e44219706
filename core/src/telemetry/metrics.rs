use std::sync::Mutex;

/// Window accounting across the lifetime of one driver.
#[derive(Debug)]
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Debug)]
struct Metrics {
    windows: usize,
    cancelled: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics {
                windows: 0,
                cancelled: 0,
            }),
        }
    }

    pub fn record_window(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.windows += 1;
        }
    }

    pub fn record_cancelled(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.cancelled += 1;
        }
    }

    /// (windows computed, runs cancelled).
    pub fn snapshot(&self) -> (usize, usize) {
        if let Ok(metrics) = self.inner.lock() {
            (metrics.windows, metrics.cancelled)
        } else {
            (0, 0)
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

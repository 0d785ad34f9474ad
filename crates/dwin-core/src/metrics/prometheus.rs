//! Prometheus metrics export.

use crate::window::EvictionReason;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for window dwell time.
/// Converts to seconds: [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const DWELL_BUCKETS_MS: [u64; 9] = [10, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Window metrics with counters, gauges, and a dwell-time histogram.
pub struct WindowMetrics {
    // === COUNTERS ===
    /// Unique events that entered the window
    events_added: AtomicU64,

    /// Duplicate arrivals merged into a buffered event
    events_merged: AtomicU64,

    /// Evictions by reason
    evictions_expired: AtomicU64,
    evictions_overflow: AtomicU64,

    /// Callbacks handed to the worker pool
    callbacks_dispatched: AtomicU64,

    /// Callbacks skipped because the pool refused the submission
    callbacks_dropped: AtomicU64,

    /// Callbacks skipped and handed back on the rejection channel
    callbacks_rejected: AtomicU64,

    // === GAUGES ===
    /// Events currently buffered
    buffered: AtomicU64,

    // === HISTOGRAM: dwell_seconds ===
    /// Sum of all dwell times in milliseconds
    dwell_sum_ms: AtomicU64,

    /// Count of dwell observations
    dwell_count: AtomicU64,

    /// Bucket counts, last slot is +Inf
    dwell_buckets: [AtomicU64; 10],
}

impl WindowMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            events_added: AtomicU64::new(0),
            events_merged: AtomicU64::new(0),
            evictions_expired: AtomicU64::new(0),
            evictions_overflow: AtomicU64::new(0),
            callbacks_dispatched: AtomicU64::new(0),
            callbacks_dropped: AtomicU64::new(0),
            callbacks_rejected: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            dwell_sum_ms: AtomicU64::new(0),
            dwell_count: AtomicU64::new(0),
            dwell_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    /// Record a unique event entering the window.
    pub fn record_added(&self) {
        self.events_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate merged into a buffered event.
    pub fn record_merged(&self) {
        self.events_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction and how long the event stayed buffered.
    pub fn record_eviction(&self, reason: EvictionReason, dwell: Duration) {
        match reason {
            EvictionReason::Expired => self.evictions_expired.fetch_add(1, Ordering::Relaxed),
            EvictionReason::Overflow => self.evictions_overflow.fetch_add(1, Ordering::Relaxed),
        };

        let dwell_ms = dwell.as_millis() as u64;
        self.dwell_sum_ms.fetch_add(dwell_ms, Ordering::Relaxed);
        self.dwell_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in DWELL_BUCKETS_MS.iter().enumerate() {
            if dwell_ms <= bucket_ms {
                self.dwell_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.dwell_buckets[DWELL_BUCKETS_MS.len()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a callback handed to the pool.
    pub fn record_dispatched(&self) {
        self.callbacks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a callback skipped after a failed submission.
    pub fn record_dropped(&self) {
        self.callbacks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a callback handed back to the caller.
    pub fn record_rejected(&self) {
        self.callbacks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the buffered event count.
    pub fn set_buffered(&self, count: usize) {
        self.buffered.store(count as u64, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn events_added(&self) -> u64 {
        self.events_added.load(Ordering::Relaxed)
    }

    pub fn events_merged(&self) -> u64 {
        self.events_merged.load(Ordering::Relaxed)
    }

    /// Get eviction count by reason.
    pub fn evictions(&self, reason: EvictionReason) -> u64 {
        match reason {
            EvictionReason::Expired => self.evictions_expired.load(Ordering::Relaxed),
            EvictionReason::Overflow => self.evictions_overflow.load(Ordering::Relaxed),
        }
    }

    /// Get total evictions.
    pub fn evictions_total(&self) -> u64 {
        self.evictions(EvictionReason::Expired) + self.evictions(EvictionReason::Overflow)
    }

    pub fn callbacks_dispatched(&self) -> u64 {
        self.callbacks_dispatched.load(Ordering::Relaxed)
    }

    pub fn callbacks_dropped(&self) -> u64 {
        self.callbacks_dropped.load(Ordering::Relaxed)
    }

    pub fn callbacks_rejected(&self) -> u64 {
        self.callbacks_rejected.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Get dwell histogram data for Prometheus export.
    pub fn dwell_histogram(&self) -> DwellHistogram {
        let mut buckets = [(0.0, 0); 9];
        for (i, &bucket_ms) in DWELL_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.dwell_buckets[i].load(Ordering::Relaxed),
            );
        }

        DwellHistogram {
            sum_seconds: self.dwell_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.dwell_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.dwell_buckets[DWELL_BUCKETS_MS.len()].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use dwin_core::metrics::WindowMetrics;
    ///
    /// let metrics = WindowMetrics::new();
    /// metrics.record_added();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("dwin_events_added_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("dwin")
    }

    /// Export metrics in Prometheus text format with custom prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(2048);

        // === COUNTERS ===

        write_metric(
            &mut output,
            prefix,
            "events_added_total",
            "counter",
            "Unique events that entered the window",
            &[("", self.events_added())],
        );
        write_metric(
            &mut output,
            prefix,
            "events_merged_total",
            "counter",
            "Duplicate arrivals merged into a buffered event",
            &[("", self.events_merged())],
        );
        write_metric(
            &mut output,
            prefix,
            "evictions_total",
            "counter",
            "Evictions by reason",
            &[
                (
                    "{reason=\"expired\"}",
                    self.evictions(EvictionReason::Expired),
                ),
                (
                    "{reason=\"overflow\"}",
                    self.evictions(EvictionReason::Overflow),
                ),
            ],
        );
        write_metric(
            &mut output,
            prefix,
            "callbacks_dispatched_total",
            "counter",
            "Eviction callbacks handed to the worker pool",
            &[("", self.callbacks_dispatched())],
        );
        write_metric(
            &mut output,
            prefix,
            "callbacks_dropped_total",
            "counter",
            "Eviction callbacks skipped after a failed submission",
            &[("", self.callbacks_dropped())],
        );
        write_metric(
            &mut output,
            prefix,
            "callbacks_rejected_total",
            "counter",
            "Eviction callbacks handed back on the rejection channel",
            &[("", self.callbacks_rejected())],
        );

        // === GAUGES ===

        write_metric(
            &mut output,
            prefix,
            "buffered_events",
            "gauge",
            "Events currently buffered in the window",
            &[("", self.buffered())],
        );

        // === HISTOGRAM: dwell_seconds ===

        let hist = self.dwell_histogram();
        let _ = writeln!(
            output,
            "# HELP {prefix}_dwell_seconds Time events spent in the window before eviction"
        );
        let _ = writeln!(output, "# TYPE {prefix}_dwell_seconds histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(output, "{prefix}_dwell_seconds_bucket{{le=\"{le}\"}} {count}");
        }
        let _ = writeln!(
            output,
            "{prefix}_dwell_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(output, "{prefix}_dwell_seconds_sum {}", hist.sum_seconds);
        let _ = writeln!(output, "{prefix}_dwell_seconds_count {}", hist.count);

        output
    }
}

fn write_metric(
    output: &mut String,
    prefix: &str,
    name: &str,
    kind: &str,
    help: &str,
    samples: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(output, "# TYPE {prefix}_{name} {kind}");
    for (labels, value) in samples {
        let _ = writeln!(output, "{prefix}_{name}{labels} {value}");
    }
    output.push('\n');
}

impl Default for WindowMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Dwell time histogram data for export.
#[derive(Debug, Clone)]
pub struct DwellHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 9],
    /// +Inf bucket count
    pub inf_bucket: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = WindowMetrics::new();

        metrics.record_added();
        metrics.record_added();
        metrics.record_merged();
        assert_eq!(metrics.events_added(), 2);
        assert_eq!(metrics.events_merged(), 1);

        metrics.record_eviction(EvictionReason::Overflow, Duration::from_millis(5));
        metrics.record_eviction(EvictionReason::Expired, Duration::from_secs(3));
        metrics.record_eviction(EvictionReason::Expired, Duration::from_secs(3));
        assert_eq!(metrics.evictions(EvictionReason::Overflow), 1);
        assert_eq!(metrics.evictions(EvictionReason::Expired), 2);
        assert_eq!(metrics.evictions_total(), 3);

        metrics.record_dispatched();
        metrics.record_dropped();
        metrics.record_rejected();
        assert_eq!(metrics.callbacks_dispatched(), 1);
        assert_eq!(metrics.callbacks_dropped(), 1);
        assert_eq!(metrics.callbacks_rejected(), 1);
    }

    #[test]
    fn test_gauge() {
        let metrics = WindowMetrics::default();
        assert_eq!(metrics.buffered(), 0);
        metrics.set_buffered(42);
        assert_eq!(metrics.buffered(), 42);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = WindowMetrics::new();

        metrics.record_eviction(EvictionReason::Overflow, Duration::from_millis(5));
        metrics.record_eviction(EvictionReason::Expired, Duration::from_millis(1000));
        metrics.record_eviction(EvictionReason::Expired, Duration::from_secs(60));

        let hist = metrics.dwell_histogram();
        assert_eq!(hist.count, 3);
        assert_eq!(hist.buckets[0], (0.01, 1)); // 10ms
        assert_eq!(hist.buckets[4], (0.5, 1)); // 500ms
        assert_eq!(hist.buckets[5], (1.0, 2)); // 1s
        assert_eq!(hist.buckets[8], (10.0, 2)); // 10s
        assert_eq!(hist.inf_bucket, 3);
        assert_eq!(hist.sum_seconds, 61.005);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = WindowMetrics::new();

        metrics.record_added();
        metrics.record_added();
        metrics.record_merged();
        metrics.record_eviction(EvictionReason::Overflow, Duration::from_millis(250));
        metrics.record_dispatched();
        metrics.set_buffered(1);

        let output = metrics.export_prometheus_text();

        assert!(output.contains("# HELP dwin_events_added_total"));
        assert!(output.contains("# TYPE dwin_events_added_total counter"));
        assert!(output.contains("dwin_events_added_total 2"));
        assert!(output.contains("dwin_events_merged_total 1"));
        assert!(output.contains("dwin_evictions_total{reason=\"overflow\"} 1"));
        assert!(output.contains("dwin_evictions_total{reason=\"expired\"} 0"));
        assert!(output.contains("dwin_callbacks_dispatched_total 1"));
        assert!(output.contains("dwin_callbacks_dropped_total 0"));

        assert!(output.contains("# TYPE dwin_buffered_events gauge"));
        assert!(output.contains("dwin_buffered_events 1"));

        assert!(output.contains("# TYPE dwin_dwell_seconds histogram"));
        assert!(output.contains("dwin_dwell_seconds_bucket{le=\"0.25\"} 1"));
        assert!(output.contains("dwin_dwell_seconds_bucket{le=\"0.1\"} 0"));
        assert!(output.contains("dwin_dwell_seconds_bucket{le=\"+Inf\"} 1"));
        assert!(output.contains("dwin_dwell_seconds_sum 0.25"));
        assert!(output.contains("dwin_dwell_seconds_count 1"));
    }

    #[test]
    fn test_prometheus_text_export_with_prefix() {
        let metrics = WindowMetrics::new();
        metrics.record_added();

        let output = metrics.export_prometheus_text_with_prefix("alerts");
        assert!(output.contains("# HELP alerts_events_added_total"));
        assert!(output.contains("alerts_events_added_total 1"));
        assert!(output.contains("alerts_dwell_seconds_bucket"));
        assert!(!output.contains("dwin_"));
    }

    #[test]
    fn test_prometheus_text_format_validity() {
        let metrics = WindowMetrics::new();
        metrics.record_eviction(EvictionReason::Expired, Duration::from_millis(150));

        let output = metrics.export_prometheus_text();

        for line in output.lines().filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("# ") {
                assert!(rest.starts_with("HELP dwin_") || rest.starts_with("TYPE dwin_"));
            } else {
                let mut parts = line.rsplitn(2, ' ');
                let value = parts.next().unwrap();
                assert!(value.parse::<f64>().is_ok(), "bad sample line: {line}");
                assert!(parts.next().unwrap().starts_with("dwin_"));
            }
        }
    }
}

//! Window metrics and Prometheus text export.

mod prometheus;

pub use prometheus::{DwellHistogram, WindowMetrics};

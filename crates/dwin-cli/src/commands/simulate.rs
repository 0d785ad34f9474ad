//! Simulate command implementation.
//!
//! Pushes a synthetic burst of notifications through a window, waits for the
//! survivors to expire and reports what came out the other side.

use anyhow::{bail, Result};
use async_trait::async_trait;
use dwin_core::{Config, EventMeta, UniqueEvent, Window, WindowStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Extra wait after the last deadline so the final expiry lands before close,
/// and the poll interval while evictions queue behind busy workers.
const SETTLE_MARGIN: Duration = Duration::from_millis(50);

/// Flags of the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub keys: usize,
    pub events: usize,
    pub duplicate_ratio: f64,
    pub listen_delay_ms: u64,
    pub json: bool,
}

impl SimulateOptions {
    fn validate(&self) -> Result<()> {
        if self.keys == 0 {
            bail!("Invalid simulation: --keys must be positive");
        }
        if !(0.0..=1.0).contains(&self.duplicate_ratio) {
            bail!(
                "Invalid simulation: --duplicate-ratio {} is outside 0.0 - 1.0",
                self.duplicate_ratio
            );
        }
        Ok(())
    }
}

/// Callback totals shared by every notification.
#[derive(Debug, Default)]
struct Tally {
    delivered: AtomicU64,
    repeats: AtomicU64,
}

/// Demo event: an alert identified by its key.
struct Notification {
    key: String,
    delay: Duration,
    tally: Arc<Tally>,
}

#[async_trait]
impl UniqueEvent for Notification {
    fn key(&self) -> &str {
        &self.key
    }

    async fn listen(self, meta: EventMeta) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.tally.delivered.fetch_add(1, Ordering::Relaxed);
        self.tally
            .repeats
            .fetch_add(meta.repeat_count, Ordering::Relaxed);
        debug!(
            key = %self.key,
            repeat_count = meta.repeat_count,
            added_at = %meta.added_at,
            "Notification delivered"
        );
    }
}

/// Deterministic key sequence: cycles through `keys` distinct keys and
/// repeats the previous key for `ratio` of the events.
struct KeyStream {
    keys: usize,
    ratio: f64,
    credit: f64,
    next: usize,
    last: Option<String>,
}

impl KeyStream {
    fn new(keys: usize, ratio: f64) -> Self {
        Self {
            keys,
            ratio,
            credit: 0.0,
            next: 0,
            last: None,
        }
    }
}

impl Iterator for KeyStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.credit += self.ratio;
        if self.credit >= 1.0 {
            if let Some(last) = &self.last {
                self.credit -= 1.0;
                return Some(last.clone());
            }
        }

        let key = format!("key-{}", self.next % self.keys);
        self.next += 1;
        self.last = Some(key.clone());
        Some(key)
    }
}

/// Simulation outcome.
#[derive(Debug, Serialize)]
struct SimulationReport {
    events: usize,
    distinct_keys: usize,
    elapsed_ms: u64,
    delivered: u64,
    repeats_delivered: u64,
    rejections_received: u64,
    discarded: usize,
    window: WindowStats,
}

/// Run the simulation and print the report.
pub async fn run(config: Config, options: SimulateOptions) -> Result<()> {
    options.validate()?;

    info!(
        events = options.events,
        keys = options.keys,
        duplicate_ratio = options.duplicate_ratio,
        "Starting simulation"
    );

    let window = Window::new(config.window)?;
    let mut rejections = window.take_rejections();
    let tally = Arc::new(Tally::default());
    let started = Instant::now();

    tokio::select! {
        result = drive(&window, &options, &tally) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), closing window");
            window.close().await;
            bail!("Simulation interrupted by signal");
        }
    }

    let discarded = window.len();
    window.close().await;
    let elapsed = started.elapsed();

    let mut rejections_received = 0;
    if let Some(rx) = rejections.as_mut() {
        while let Ok(rejected) = rx.try_recv() {
            rejections_received += 1;
            debug!(
                key = %rejected.event.key(),
                error = %rejected.error,
                "Notification rejected"
            );
        }
    }

    let report = SimulationReport {
        events: options.events,
        distinct_keys: options.keys,
        elapsed_ms: elapsed.as_millis() as u64,
        delivered: tally.delivered.load(Ordering::Relaxed),
        repeats_delivered: tally.repeats.load(Ordering::Relaxed),
        rejections_received,
        discarded,
        window: window.stats(),
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
        println!();
        print!("{}", window.metrics().export_prometheus_text());
    }

    info!(delivered = report.delivered, "Simulation finished");
    Ok(())
}

/// Add the burst, then wait until everything left has been evicted.
async fn drive(
    window: &Window<Notification>,
    options: &SimulateOptions,
    tally: &Arc<Tally>,
) -> Result<()> {
    let delay = Duration::from_millis(options.listen_delay_ms);

    for key in KeyStream::new(options.keys, options.duplicate_ratio).take(options.events) {
        window
            .add(Notification {
                key,
                delay,
                tally: Arc::clone(tally),
            })
            .await?;
    }

    tokio::time::sleep(window.config().duration() + SETTLE_MARGIN).await;

    // Blocking pools hold expired entries back until a worker frees up
    while !window.is_empty() {
        tokio::time::sleep(SETTLE_MARGIN).await;
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let stats = &report.window;
    println!("Simulation finished in {} ms\n", report.elapsed_ms);
    println!("--- Window ---");
    println!("  size:              {}", stats.size);
    println!("  duration:          {} ms", stats.duration_ms);
    println!("  pool size:         {}", stats.pool_size);
    println!("  dispatch mode:     {:?}", stats.dispatch_mode);
    println!("\n--- Traffic ---");
    println!("  events sent:       {}", report.events);
    println!("  unique added:      {}", stats.events_added);
    println!("  duplicates merged: {}", stats.events_merged);
    println!(
        "  evictions:         {} expired, {} overflow",
        stats.evictions_expired, stats.evictions_overflow
    );
    println!("\n--- Callbacks ---");
    println!("  dispatched:        {}", stats.callbacks_dispatched);
    println!("  delivered:         {}", report.delivered);
    println!("  dropped:           {}", stats.callbacks_dropped);
    println!("  rejected:          {}", stats.callbacks_rejected);
    println!("  discarded:         {}", report.discarded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwin_core::WindowConfig;

    fn options(keys: usize, events: usize, duplicate_ratio: f64) -> SimulateOptions {
        SimulateOptions {
            keys,
            events,
            duplicate_ratio,
            listen_delay_ms: 0,
            json: true,
        }
    }

    #[test]
    fn test_key_stream_without_duplicates() {
        let keys: Vec<_> = KeyStream::new(3, 0.0).take(4).collect();
        assert_eq!(keys, vec!["key-0", "key-1", "key-2", "key-0"]);
    }

    #[test]
    fn test_key_stream_alternates_at_half() {
        let keys: Vec<_> = KeyStream::new(10, 0.5).take(4).collect();
        assert_eq!(keys, vec!["key-0", "key-0", "key-1", "key-1"]);
    }

    #[test]
    fn test_key_stream_all_duplicates() {
        let keys: Vec<_> = KeyStream::new(10, 1.0).take(3).collect();
        assert_eq!(keys, vec!["key-0", "key-0", "key-0"]);
    }

    #[test]
    fn test_options_validation() {
        assert!(options(0, 10, 0.5).validate().is_err());
        assert!(options(5, 10, 1.5).validate().is_err());
        assert!(options(5, 10, -0.1).validate().is_err());
        assert!(options(5, 0, 0.0).validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_burst() {
        let window = Window::new(
            WindowConfig::new()
                .with_size(5)
                .with_duration(Duration::from_millis(100)),
        )
        .unwrap();
        let tally = Arc::new(Tally::default());

        drive(&window, &options(4, 20, 0.5), &tally).await.unwrap();
        window.close().await;

        let stats = window.stats();
        assert_eq!(stats.events_added, 4);
        assert_eq!(stats.events_merged, 16);
        assert_eq!(stats.evictions_expired, 4);
        assert_eq!(tally.delivered.load(Ordering::Relaxed), 4);
        assert_eq!(tally.repeats.load(Ordering::Relaxed), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_waits_for_busy_workers() {
        let window = Window::new(
            WindowConfig::new()
                .with_size(10)
                .with_duration(Duration::from_millis(100))
                .with_block_pool(1),
        )
        .unwrap();
        let tally = Arc::new(Tally::default());
        let mut slow = options(5, 5, 0.0);
        slow.listen_delay_ms = 100;

        drive(&window, &slow, &tally).await.unwrap();
        assert!(window.is_empty());
        window.close().await;

        let stats = window.stats();
        assert_eq!(stats.events_added, 5);
        assert_eq!(stats.evictions_expired, 5);
        assert_eq!(stats.callbacks_dispatched, 5);
        assert_eq!(tally.delivered.load(Ordering::Relaxed), 5);
    }
}

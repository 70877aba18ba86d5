//! Recurring age-based eviction.

use crate::config::CollectorConfig;
use crate::metrics::MetricStore;
use crate::traces::TraceStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::warn;

pub const EVICTION_PERIOD: Duration = Duration::from_secs(60);

pub fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Spawns the eviction timer. Each tick re-reads the config file so age
/// limits can change at runtime; read/parse failures are logged and
/// swallowed so the timer keeps firing. Abort the handle on shutdown.
pub fn spawn(
    traces: Arc<TraceStore>,
    metrics: Arc<MetricStore>,
    config_path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so eviction starts one
        // period after startup, like the ingestion-side timers.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_tick(&traces, &metrics, &config_path);
        }
    })
}

fn run_tick(traces: &TraceStore, metrics: &MetricStore, config_path: &std::path::Path) {
    let config = match CollectorConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "skipping eviction tick: config unreadable");
            return;
        }
    };

    let now = unix_nanos_now();

    if let Some(max_age) = config.max_span_age() {
        let cutoff = now.saturating_sub(max_age.as_nanos() as u64);
        traces.evict_older_than(cutoff);
    }

    if let Some(max_age) = config.max_metric_age() {
        let cutoff = now.saturating_sub(max_age.as_nanos() as u64);
        metrics.evict_older_than(cutoff);
    }
}

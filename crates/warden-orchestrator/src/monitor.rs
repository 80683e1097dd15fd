use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Telemetry for one background sweep loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Loop name.
    pub name: String,
    /// Configured period.
    pub interval_secs: u64,
    /// Completed sweeps, failed ones included.
    pub runs: u64,
    /// Sweeps that returned an error.
    pub failed_runs: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Start of the last sweep.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Duration of the last sweep.
    pub last_duration_ms: u64,
    /// Report of the last successful sweep.
    pub last_summary: Option<serde_json::Value>,
    /// Error of the last failed sweep, cleared on success.
    pub last_error: Option<String>,
}

/// Tracks state and metrics for the queue processor and watchdog loops.
pub struct SweepMonitor {
    loops: Arc<RwLock<HashMap<String, SweepStats>>>,
}

impl SweepMonitor {
    /// An empty monitor.
    pub fn new() -> Self {
        Self {
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a loop so it shows up before its first run.
    pub async fn register(&self, name: &str, interval_secs: u64) {
        let mut loops = self.loops.write().await;
        let stats = loops.entry(name.to_string()).or_insert_with(|| SweepStats {
            name: name.to_string(),
            ..Default::default()
        });
        stats.interval_secs = interval_secs;
    }

    /// Record a sweep that completed with `summary`.
    pub async fn record_success(&self, name: &str, summary: serde_json::Value, duration_ms: u64) {
        let mut loops = self.loops.write().await;
        let stats = Self::entry(&mut loops, name);
        stats.runs += 1;
        stats.consecutive_failures = 0;
        stats.last_run_at = Some(Utc::now());
        stats.last_duration_ms = duration_ms;
        stats.last_summary = Some(summary);
        stats.last_error = None;
    }

    /// Record a sweep that failed.
    pub async fn record_failure(&self, name: &str, error: &str, duration_ms: u64) {
        let mut loops = self.loops.write().await;
        let stats = Self::entry(&mut loops, name);
        stats.runs += 1;
        stats.failed_runs += 1;
        stats.consecutive_failures += 1;
        stats.last_run_at = Some(Utc::now());
        stats.last_duration_ms = duration_ms;
        stats.last_error = Some(error.to_string());
    }

    /// Stats for one loop.
    pub async fn get(&self, name: &str) -> Option<SweepStats> {
        self.loops.read().await.get(name).cloned()
    }

    /// All loops, sorted by name.
    pub async fn snapshot(&self) -> Vec<SweepStats> {
        let mut all: Vec<SweepStats> = self.loops.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// `{"loops": [...]}`, sorted by loop name.
    pub async fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "loops": self.snapshot().await })
    }

    fn entry<'a>(loops: &'a mut HashMap<String, SweepStats>, name: &str) -> &'a mut SweepStats {
        loops.entry(name.to_string()).or_insert_with(|| SweepStats {
            name: name.to_string(),
            ..Default::default()
        })
    }
}

impl Default for SweepMonitor {
    fn default() -> Self {
        Self::new()
    }
}

//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every media-stream actor.
//!
//! ## What lives here:
//! - **config**: current configuration; media streams snapshot it when they connect
//! - **metrics**: HTTP request counters plus bridge-wide audio counters
//! - **registry**: the table of live media-stream connections
//!
//! ## What does not:
//! Audio. Track buffers and sinks belong to each session task and are never
//! shared, so nothing on the audio path takes these locks per sample. Sessions
//! report their counters once, when they finish.
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread's handlers and actors hold a clone
//! - **RwLock**: many concurrent readers (metrics, config snapshots), rare writers

use crate::audio::registry::SessionRegistry;
use crate::audio::session::SessionSummary;
use crate::config::AppConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and bridge metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live media-stream connections
    pub registry: Arc<SessionRegistry>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all requests and sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed HTTP requests
    pub error_count: u64,

    /// Key: endpoint (e.g. "GET /api/v1/health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub bridge: BridgeMetrics,
}

/// Totals across every media session since server start.
///
/// Frame and chunk counts are folded in when a session ends, so a call that
/// is still streaming is not reflected yet.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BridgeMetrics {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    /// Media frames rejected at the transport for an unrecognized track label
    pub frames_unknown_track: u64,
    pub chunks_emitted: u64,
    pub bytes_discarded: u64,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = SessionRegistry::new(config.performance.max_concurrent_sessions);
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: Arc::new(registry),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so a media stream can snapshot
    /// its settings without blocking a concurrent config update.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// The session cap takes effect for the next upgrade; live connections are
    /// never evicted.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        self.registry
            .set_max_sessions(new_config.performance.max_concurrent_sessions);
        *self.config.write().unwrap() = new_config;
        Ok(())
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health", "PUT /api/v1/config")
    /// - **duration_ms**: How long the request took to process (in milliseconds)
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.bridge.sessions_started += 1;
    }

    /// Fold a finished session's counters into the totals.
    pub fn record_session_finished(&self, summary: &SessionSummary) {
        let mut metrics = self.metrics.write().unwrap();
        let bridge = &mut metrics.bridge;

        if summary.end.is_failure() {
            bridge.sessions_failed += 1;
        } else {
            bridge.sessions_completed += 1;
        }
        bridge.frames_decoded += summary.stats.frames_decoded;
        bridge.frames_dropped += summary.stats.frames_dropped;
        bridge.chunks_emitted += summary.stats.chunks_emitted;
        bridge.bytes_discarded += summary.stats.bytes_discarded;
    }

    pub fn record_unknown_track(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.bridge.frames_unknown_track += 1;
    }

    /// Get a snapshot of current metrics (used for the metrics endpoint).
    ///
    /// Cloning avoids holding the lock while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

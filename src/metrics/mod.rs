//! Observability for the background engines.
//!
//! Keepalive repairs and watch refreshes never surface errors to callers, so
//! their outcomes are reported through a [`DiscoveryObserver`]. The default
//! [`MetricsObserver`] logs and feeds the Prometheus collectors below, which
//! [`start_server`] exposes on `/metrics`.

#[cfg(test)]
mod metrics_test;

use std::net::SocketAddr;
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::Error;
use crate::StoreError;

lazy_static! {
    pub static ref KEEPALIVE_REPAIRS: IntCounterVec = IntCounterVec::new(
        Opts::new("zksd_keepalive_repairs_total", "Keepalive repair attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("zksd_watch_failures_total", "Watch refresh and re-arm failures"),
        &["stage"]
    )
    .expect("metric can not be created");

    pub static ref RESOLVE_NOW_FAILURES: IntCounter = IntCounter::new(
        "zksd_resolve_now_failures_total",
        "On-demand resolutions that failed and were swallowed"
    )
    .expect("metric can not be created");

    pub static ref REGISTERED_RECORDS: IntGauge =
        IntGauge::new("zksd_registered_records", "Records kept alive by this process")
            .expect("metric can not be created");

    pub static ref ACTIVE_WATCHES: IntGauge =
        IntGauge::new("zksd_active_watches", "Watch subscriptions currently running")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_ONCE: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(KEEPALIVE_REPAIRS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RESOLVE_NOW_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REGISTERED_RECORDS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_WATCHES.clone()))
        .expect("collector can be registered");
}

/// Hook for outcomes of background work that is never escalated to callers.
///
/// Every method has a no-op default so implementors only override what
/// they care about.
pub trait DiscoveryObserver: Send + Sync + 'static {
    /// One keepalive repair attempt for the record at `path`
    fn on_keepalive_repair(
        &self,
        _path: &str,
        _outcome: &std::result::Result<(), StoreError>,
    ) {
    }

    /// A notification fired but the address list could not be recomputed
    fn on_watch_refresh_failed(
        &self,
        _path: &str,
        _error: &Error,
    ) {
    }

    /// The one-shot notification could not be re-armed
    fn on_watch_rearm_failed(
        &self,
        _path: &str,
        _error: &StoreError,
    ) {
    }

    fn on_resolve_now_failed(
        &self,
        _path: &str,
        _error: &Error,
    ) {
    }

    /// Active keepalive loops and watches after a registry change
    fn on_tasks_changed(
        &self,
        _registrations: usize,
        _watches: usize,
    ) {
    }
}

/// Default observer: structured logs plus Prometheus counters
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl DiscoveryObserver for MetricsObserver {
    fn on_keepalive_repair(
        &self,
        path: &str,
        outcome: &std::result::Result<(), StoreError>,
    ) {
        match outcome {
            Ok(()) => {
                KEEPALIVE_REPAIRS.with_label_values(&["repaired"]).inc();
                info!(path, "keepalive re-created registration record");
            }
            Err(e) => {
                KEEPALIVE_REPAIRS.with_label_values(&["failed"]).inc();
                debug!(path, "keepalive repair failed, retrying next tick: {}", e);
            }
        }
    }

    fn on_watch_refresh_failed(
        &self,
        path: &str,
        error: &Error,
    ) {
        WATCH_FAILURES.with_label_values(&["refresh"]).inc();
        error!(path, "Failed to get nodes: {}", error);
    }

    fn on_watch_rearm_failed(
        &self,
        path: &str,
        error: &StoreError,
    ) {
        WATCH_FAILURES.with_label_values(&["rearm"]).inc();
        warn!(path, "Failed to re-arm watch: {}", error);
    }

    fn on_resolve_now_failed(
        &self,
        path: &str,
        error: &Error,
    ) {
        RESOLVE_NOW_FAILURES.inc();
        warn!(path, "resolve_now failed: {}", error);
    }

    fn on_tasks_changed(
        &self,
        registrations: usize,
        watches: usize,
    ) {
        REGISTERED_RECORDS.set(registrations as i64);
        ACTIVE_WATCHES.set(watches as i64);
    }
}

/// Serves `/metrics` until `shutdown_signal` changes
pub async fn start_server(
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER_ONCE.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(%addr, "starting metrics server");
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render_metrics(&REGISTRY))
}

pub(crate) fn render_metrics(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

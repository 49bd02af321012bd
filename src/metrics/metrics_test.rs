use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("test".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    KEEPALIVE_REPAIRS.with_label_values(&["repaired"]).inc();
    let metrics = registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"test_zksd_keepalive_repairs_total"),
        "Missing test_zksd_keepalive_repairs_total"
    );
}

#[test]
fn metrics_observer_counts_repair_outcomes() {
    let observer = MetricsObserver;
    let repaired = KEEPALIVE_REPAIRS.with_label_values(&["repaired"]).get();
    let failed = KEEPALIVE_REPAIRS.with_label_values(&["failed"]).get();

    observer.on_keepalive_repair("/svc/a", &Ok(()));
    observer.on_keepalive_repair("/svc/a", &Err(StoreError::ConnectionLoss));
    observer.on_keepalive_repair("/svc/a", &Err(StoreError::ConnectionLoss));

    // counters are process-global; assert on deltas
    assert!(KEEPALIVE_REPAIRS.with_label_values(&["repaired"]).get() >= repaired + 1);
    assert!(KEEPALIVE_REPAIRS.with_label_values(&["failed"]).get() >= failed + 2);
}

#[test]
fn metrics_observer_tracks_watch_failure_stages() {
    let observer = MetricsObserver;
    let refresh = WATCH_FAILURES.with_label_values(&["refresh"]).get();
    let rearm = WATCH_FAILURES.with_label_values(&["rearm"]).get();

    observer.on_watch_refresh_failed("/svc", &Error::ClientClosed);
    observer.on_watch_rearm_failed("/svc", &StoreError::SessionExpired);

    assert!(WATCH_FAILURES.with_label_values(&["refresh"]).get() > refresh);
    assert!(WATCH_FAILURES.with_label_values(&["rearm"]).get() > rearm);
}

#[test]
fn render_metrics_emits_text_format() {
    let registry = create_test_registry();
    RESOLVE_NOW_FAILURES.inc();

    let body = render_metrics(&registry);
    assert!(body.contains("test_zksd_resolve_now_failures_total"));
}

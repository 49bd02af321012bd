use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::async_trait;

use crate::session::CoordinationSession;
use crate::session::CreateMode;
use crate::session::MemorySession;
use crate::session::MemoryStore;
use crate::session::OneshotWatch;
use crate::session::SessionState;
use crate::ClientConfig;
use crate::DiscoveryClient;
use crate::DiscoveryObserver;
use crate::Error;
use crate::StoreError;
use crate::StoreResult;

pub const TEST_KEEPALIVE: Duration = Duration::from_millis(100);

/// Everything reported through [`DiscoveryObserver`], in arrival order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub repairs: Mutex<Vec<(String, Result<(), StoreError>)>>,
    pub refresh_failures: Mutex<Vec<String>>,
    pub rearm_failures: Mutex<Vec<String>>,
    pub resolve_now_failures: Mutex<Vec<String>>,
    pub task_counts: Mutex<Vec<(usize, usize)>>,
}

impl RecordingObserver {
    pub fn successful_repairs(&self) -> usize {
        self.repairs.lock().iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed_repairs(&self) -> usize {
        self.repairs.lock().iter().filter(|(_, r)| r.is_err()).count()
    }
}

impl DiscoveryObserver for RecordingObserver {
    fn on_keepalive_repair(
        &self,
        path: &str,
        outcome: &Result<(), StoreError>,
    ) {
        self.repairs.lock().push((path.to_string(), outcome.clone()));
    }

    fn on_watch_refresh_failed(
        &self,
        path: &str,
        _error: &Error,
    ) {
        self.refresh_failures.lock().push(path.to_string());
    }

    fn on_watch_rearm_failed(
        &self,
        path: &str,
        _error: &StoreError,
    ) {
        self.rearm_failures.lock().push(path.to_string());
    }

    fn on_resolve_now_failed(
        &self,
        path: &str,
        _error: &Error,
    ) {
        self.resolve_now_failures.lock().push(path.to_string());
    }

    fn on_tasks_changed(
        &self,
        registrations: usize,
        watches: usize,
    ) {
        self.task_counts.lock().push((registrations, watches));
    }
}

pub fn test_client_config() -> ClientConfig {
    ClientConfig {
        keepalive_interval: TEST_KEEPALIVE,
        delivery_buffer: 16,
    }
}

/// A client on its own memory session, plus that session for fault injection
pub fn memory_client(store: &MemoryStore) -> (DiscoveryClient, Arc<MemorySession>, Arc<RecordingObserver>) {
    let session = Arc::new(store.connect());
    let observer = Arc::new(RecordingObserver::default());
    let client = DiscoveryClient::new(session.clone(), test_client_config()).with_observer(observer.clone());
    (client, session, observer)
}

/// Memory session whose reads and writes can be made to hang, like requests
/// queued on a store connection that never answers. Deletes, watches and
/// close stay responsive.
pub struct StallingSession {
    inner: MemorySession,
    stalled: AtomicBool,
}

impl StallingSession {
    pub fn new(store: &MemoryStore) -> Self {
        Self {
            inner: store.connect(),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn memory(&self) -> &MemorySession {
        &self.inner
    }

    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    async fn gate(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl CoordinationSession for StallingSession {
    fn state(&self) -> SessionState {
        self.inner.state()
    }

    fn session_id(&self) -> i64 {
        self.inner.session_id()
    }

    async fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        self.gate().await;
        self.inner.exists(path).await
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> StoreResult<String> {
        self.gate().await;
        self.inner.create(path, data, mode).await
    }

    async fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()> {
        self.inner.delete(path).await
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> StoreResult<Vec<u8>> {
        self.gate().await;
        self.inner.get_data(path).await
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>> {
        self.inner.get_children(path).await
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Vec<String>, OneshotWatch)> {
        self.inner.children_watch(path).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// A client on a [`StallingSession`]
pub fn stalling_client(store: &MemoryStore) -> (DiscoveryClient, Arc<StallingSession>) {
    let session = Arc::new(StallingSession::new(store));
    let client = DiscoveryClient::new(session.clone(), test_client_config())
        .with_observer(Arc::new(RecordingObserver::default()));
    (client, session)
}

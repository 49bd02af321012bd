//! Client scope for registration and discovery.
//!
//! A [`DiscoveryClient`] owns one coordination session plus the two
//! registries every engine shares:
//! - the self-registration registry (address -> record id), consulted by
//!   every address computation to drop this client's own entries
//! - the cancellation registry (registration or watch id -> background task)
//!
//! Cloning the client is cheap; all clones share the same scope and
//! [`close`](DiscoveryClient::close) ends it for all of them.

mod path;
mod registration;
mod registry;
mod watch;

pub use path::*;
pub use registration::*;
pub use watch::*;

pub(crate) use registry::*;


use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::DEFAULT_DELIVERY_BUFFER;
use crate::constants::DEFAULT_KEEPALIVE_INTERVAL;
use crate::constants::WATCH_ID_PREFIX;
use crate::session::CoordinationSession;
use crate::DiscoveryObserver;
use crate::Error;
use crate::MetricsObserver;
use crate::RegistrationConfig;
use crate::Result;
use crate::StoreConfig;

/// Engine tuning shared by every registration and watch of one client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Keepalive tick, also the retry delay of a watch that failed to re-arm
    pub keepalive_interval: Duration,
    /// Capacity of each watch's delivery channel
    pub delivery_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
        }
    }
}

impl From<&RegistrationConfig> for ClientConfig {
    fn from(config: &RegistrationConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval(),
            delivery_buffer: config.delivery_buffer.max(1),
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) session: Arc<dyn CoordinationSession>,
    pub(crate) self_registry: SelfRegistry,
    pub(crate) tasks: CancellationRegistry,
    pub(crate) observer: Arc<dyn DiscoveryObserver>,
    pub(crate) config: ClientConfig,
    closed: AtomicBool,
    close_lock: tokio::sync::Mutex<()>,
}

impl ClientInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pushes the current task counts to the observer
    pub(crate) fn report_tasks(&self) {
        let watches = self.tasks.count_where(|id| id.starts_with(WATCH_ID_PREFIX));
        let registrations = self.tasks.len().saturating_sub(watches);
        self.observer.on_tasks_changed(registrations, watches);
    }
}

/// Handle to one coordination session and everything registered or
/// watched through it
#[derive(Clone)]
pub struct DiscoveryClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("session_state", &self.inner.session.state())
            .field("registered", &self.inner.self_registry.len())
            .field("tasks", &self.inner.tasks.len())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl DiscoveryClient {
    /// Connects to the configured ZooKeeper ensemble
    #[cfg(feature = "zookeeper")]
    pub async fn connect(
        store: &StoreConfig,
        config: ClientConfig,
    ) -> Result<Self> {
        let connect_string = store.connect_string();
        let session = crate::session::ZooKeeperSession::connect(&connect_string, store.session_timeout())
            .await
            .map_err(|e| {
                warn!(servers = %connect_string, "Failed to connect to coordination store: {}", e);
                Error::from(e)
            })?;

        info!(servers = %connect_string, "discovery client connected");
        Ok(Self::new(Arc::new(session), config))
    }

    #[cfg(not(feature = "zookeeper"))]
    pub async fn connect(
        store: &StoreConfig,
        _config: ClientConfig,
    ) -> Result<Self> {
        warn!(servers = %store.connect_string(), "no coordination store backend compiled in");
        Err(Error::StoreUnavailable {
            source: crate::StoreError::Backend("built without the `zookeeper` feature".to_string()),
        })
    }

    /// Wraps an already established session
    pub fn new(
        session: Arc<dyn CoordinationSession>,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                session,
                self_registry: SelfRegistry::default(),
                tasks: CancellationRegistry::default(),
                observer: Arc::new(MetricsObserver),
                config,
                closed: AtomicBool::new(false),
                close_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Replaces the observer that receives background outcomes.
    ///
    /// Only effective before the client is cloned or used.
    pub fn with_observer(
        mut self,
        observer: Arc<dyn DiscoveryObserver>,
    ) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.observer = observer,
            None => warn!("observer ignored: client already shared"),
        }
        self
    }

    pub fn session(&self) -> Arc<dyn CoordinationSession> {
        self.inner.session.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Creates every missing node of `path` and returns the normalized path
    pub async fn ensure_path(
        &self,
        path: &str,
    ) -> Result<String> {
        self.inner.ensure_open()?;
        ensure_path(self.inner.session.as_ref(), path).await
    }

    /// Current addresses registered under `base_path`, minus this client's own
    pub async fn get_registered_addresses(
        &self,
        base_path: &str,
    ) -> Result<Vec<String>> {
        self.inner.ensure_open()?;
        let path = ensure_path(self.inner.session.as_ref(), base_path).await?;
        let children = self.inner.session.get_children(&path).await?;
        read_addresses(&self.inner, &path, children).await
    }

    /// Number of registrations this client currently keeps alive
    pub fn registration_count(&self) -> usize {
        self.inner.tasks.len().saturating_sub(self.watch_count())
    }

    pub fn watch_count(&self) -> usize {
        self.inner.tasks.count_where(|id| id.starts_with(WATCH_ID_PREFIX))
    }

    /// Stops every keepalive loop and watch, then closes the session.
    ///
    /// Idempotent. Returns once every background task has exited; no watch
    /// delivers anything after this returns.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.close_lock.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("discovery client already closed");
            return Ok(());
        }

        let tasks = self.inner.tasks.drain();
        let count = tasks.len();
        // signal every task first so their exits overlap
        for (_, task) in tasks.iter() {
            task.cancel();
        }
        for (id, task) in tasks {
            debug!(%id, "stopping background task");
            task.shutdown().await;
        }
        self.inner.self_registry.clear();
        self.inner.report_tasks();

        self.inner.session.close().await?;
        info!(tasks = count, "discovery client closed");
        Ok(())
    }
}

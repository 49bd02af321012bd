//! ZooKeeper backend built on the `zookeeper-client` crate.
//!
//! A `zookeeper-client` session cannot outlive expiry, so this wrapper keeps
//! one client at a time and transparently opens a new one when the current
//! session is found expired. `session_id()` reports a local generation that
//! changes with every new underlying session.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tonic::async_trait;
use tracing::info;
use tracing::warn;
use zookeeper_client as zk;

use super::CoordinationSession;
use super::CreateMode;
use super::OneshotWatch;
use super::SessionState;
use super::WatchEvent;
use super::WatchEventKind;
use crate::StoreError;
use crate::StoreResult;

pub struct ZooKeeperSession {
    connect_string: String,
    session_timeout: Duration,
    client: RwLock<Option<Arc<zk::Client>>>,
    generation: AtomicI64,
    renew_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ZooKeeperSession {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ZooKeeperSession")
            .field("connect_string", &self.connect_string)
            .field("session_timeout", &self.session_timeout)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl ZooKeeperSession {
    pub async fn connect(
        connect_string: &str,
        session_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = open(connect_string, session_timeout).await?;
        info!(servers = connect_string, "Connected to ZooKeeper");

        Ok(Self {
            connect_string: connect_string.to_string(),
            session_timeout,
            client: RwLock::new(Some(Arc::new(client))),
            generation: AtomicI64::new(1),
            renew_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn current(&self) -> StoreResult<Arc<zk::Client>> {
        self.client.read().clone().ok_or(StoreError::Closed)
    }

    /// Current client, replaced first if its session has expired
    async fn live(&self) -> StoreResult<Arc<zk::Client>> {
        let client = self.current()?;
        if map_state(client.state_watcher().state()) != SessionState::Expired {
            return Ok(client);
        }

        let _guard = self.renew_lock.lock().await;
        let client = self.current()?;
        if map_state(client.state_watcher().state()) != SessionState::Expired {
            // renewed by someone else while we waited
            return Ok(client);
        }

        warn!(servers = %self.connect_string, "ZooKeeper session expired, opening a new one");
        let fresh = Arc::new(open(&self.connect_string, self.session_timeout).await?);
        let mut slot = self.client.write();
        if slot.is_none() {
            return Err(StoreError::Closed);
        }
        *slot = Some(fresh.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(fresh)
    }
}

async fn open(
    connect_string: &str,
    session_timeout: Duration,
) -> StoreResult<zk::Client> {
    zk::Client::connector()
        .session_timeout(session_timeout)
        .connect(connect_string)
        .await
        .map_err(|e| map_error(e, connect_string))
}

fn map_state(state: zk::SessionState) -> SessionState {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => SessionState::Connected,
        zk::SessionState::Disconnected => SessionState::Disconnected,
        zk::SessionState::Expired => SessionState::Expired,
        _ => SessionState::Closed,
    }
}

fn map_error(
    err: zk::Error,
    path: &str,
) -> StoreError {
    match err {
        zk::Error::NoNode => StoreError::NoNode(path.to_string()),
        zk::Error::NodeExists => StoreError::NodeExists(path.to_string()),
        zk::Error::NotEmpty => StoreError::NotEmpty(path.to_string()),
        zk::Error::ConnectionLoss => StoreError::ConnectionLoss,
        zk::Error::SessionExpired => StoreError::SessionExpired,
        zk::Error::ClientClosed => StoreError::Closed,
        other => StoreError::Backend(other.to_string()),
    }
}

fn map_event(event: zk::WatchedEvent) -> WatchEvent {
    let kind = match event.event_type {
        zk::EventType::NodeChildrenChanged => WatchEventKind::NodeChildrenChanged,
        zk::EventType::Session => WatchEventKind::Session(map_state(event.session_state)),
        other => WatchEventKind::Other(format!("{other:?}")),
    };
    WatchEvent { kind, path: event.path }
}

#[async_trait]
impl CoordinationSession for ZooKeeperSession {
    fn state(&self) -> SessionState {
        match self.current() {
            Ok(client) => map_state(client.state_watcher().state()),
            Err(_) => SessionState::Closed,
        }
    }

    fn session_id(&self) -> i64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        let client = self.live().await?;
        let stat = client.check_stat(path).await.map_err(|e| map_error(e, path))?;
        Ok(stat.is_some())
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> StoreResult<String> {
        let client = self.live().await?;
        let mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        };
        client
            .create(path, data, &mode.with_acls(zk::Acls::anyone_all()))
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(path.to_string())
    }

    async fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()> {
        let client = self.live().await?;
        client.delete(path, None).await.map_err(|e| map_error(e, path))
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> StoreResult<Vec<u8>> {
        let client = self.live().await?;
        let (data, _stat) = client.get_data(path).await.map_err(|e| map_error(e, path))?;
        Ok(data)
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>> {
        let client = self.live().await?;
        client.list_children(path).await.map_err(|e| map_error(e, path))
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Vec<String>, OneshotWatch)> {
        let client = self.live().await?;
        let (children, _stat, watcher) = client
            .get_and_watch_children(path)
            .await
            .map_err(|e| map_error(e, path))?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let event = watcher.changed().await;
            let _ = tx.send(map_event(event));
        });

        Ok((children, OneshotWatch::new(path, rx)))
    }

    async fn close(&self) -> StoreResult<()> {
        // dropping the last client handle ends the session
        if self.client.write().take().is_some() {
            info!(servers = %self.connect_string, "ZooKeeper session closed");
        }
        Ok(())
    }
}

//! Coordination session capability.
//!
//! The discovery engines never talk to a concrete store; they talk to a
//! [`CoordinationSession`]: a single logical, possibly reconnecting session
//! offering node CRUD and one-shot children notifications. Two backends ship
//! with the crate:
//! - [`MemoryStore`] - an in-process tree with sessions, ephemeral nodes and
//!   fault injection, used by tests and embedded deployments
//! - `ZooKeeperSession` - a ZooKeeper ensemble (cargo feature `zookeeper`)

mod memory;
pub use memory::*;

#[cfg(feature = "zookeeper")]
mod zookeeper;
#[cfg(feature = "zookeeper")]
pub use self::zookeeper::*;


use std::fmt;

#[cfg(test)]
use mockall::automock;
use tokio::sync::oneshot;
use tonic::async_trait;

use crate::StoreResult;

/// Health of the underlying session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Handshake in progress, no session yet
    Connecting,
    /// Healthy: the session exists and round-trips succeed
    Connected,
    /// Connection lost; the session (and its ephemeral nodes) may still be alive
    Disconnected,
    /// The store ended the session and removed its ephemeral nodes
    Expired,
    /// Closed locally
    Closed,
}

impl SessionState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Expired => "expired",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime of a created node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Removed by the store when the creating session ends
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    NodeChildrenChanged,
    /// Session level notification delivered on the watch channel
    Session(SessionState),
    /// Anything else the backend reports; treated as "re-arm"
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

/// A one-shot children notification.
///
/// Fires at most once. If the store drops the watch without firing (session
/// closed, backend gone) the notification resolves to a
/// `Session(Disconnected)` event so the caller can re-arm.
#[derive(Debug)]
pub struct OneshotWatch {
    path: String,
    rx: oneshot::Receiver<WatchEvent>,
}

impl OneshotWatch {
    pub fn new(
        path: impl Into<String>,
        rx: oneshot::Receiver<WatchEvent>,
    ) -> Self {
        Self { path: path.into(), rx }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn changed(self) -> WatchEvent {
        let path = self.path;
        self.rx.await.unwrap_or(WatchEvent {
            kind: WatchEventKind::Session(SessionState::Disconnected),
            path,
        })
    }
}

/// Client side of a coordination store session.
///
/// Implementations must be safe for concurrent use from many tasks: keepalive
/// loops, watch tasks and callers all share one session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationSession: Send + Sync + 'static {
    fn state(&self) -> SessionState;

    /// Identity of the session currently backing this handle. Changes when a
    /// new session is established after expiry.
    fn session_id(&self) -> i64;

    async fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool>;

    /// Creates `path` holding `data`; returns the created path
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> StoreResult<String>;

    async fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()>;

    async fn get_data(
        &self,
        path: &str,
    ) -> StoreResult<Vec<u8>>;

    async fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>>;

    /// Lists children of `path` and arms a one-shot children notification
    async fn children_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Vec<String>, OneshotWatch)>;

    /// Ends the session. The store drops every ephemeral node it owns.
    async fn close(&self) -> StoreResult<()>;
}

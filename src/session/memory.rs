use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tonic::async_trait;
use tracing::debug;
use tracing::trace;

use super::CoordinationSession;
use super::CreateMode;
use super::OneshotWatch;
use super::SessionState;
use super::WatchEvent;
use super::WatchEventKind;
use crate::StoreError;
use crate::StoreResult;

const ROOT: &str = "/";

/// In-process coordination store.
///
/// Cheap to clone; every clone and every [`MemorySession`] handed out by
/// [`connect`](Self::connect) shares one tree. Sessions own their ephemeral
/// nodes and one-shot watches exactly like ZooKeeper sessions do, and expose
/// fault injection (`disconnect`, `reconnect`, `expire`) for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tree: Arc<RwLock<Tree>>,
    next_session_id: Arc<AtomicI64>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    /// Armed one-shot children watches, keyed by watched path
    watches: HashMap<String, Vec<ArmedWatch>>,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    /// Owning session for ephemeral nodes
    owner: Option<i64>,
}

#[derive(Debug)]
struct ArmedWatch {
    session_id: i64,
    tx: oneshot::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session against this store
    pub fn connect(&self) -> MemorySession {
        let id = self.allocate_session_id();
        debug!(session_id = id, "memory session established");
        MemorySession {
            store: self.clone(),
            inner: Mutex::new(SessionInner {
                id,
                state: SessionState::Connected,
            }),
        }
    }

    /// Children of `path` as seen by an observer outside any session
    pub fn children(
        &self,
        path: &str,
    ) -> Option<Vec<String>> {
        let tree = self.tree.read();
        tree.contains(path).then(|| tree.children_of(path))
    }

    /// Value of `path` as seen by an observer outside any session
    pub fn data(
        &self,
        path: &str,
    ) -> Option<Vec<u8>> {
        self.tree.read().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn is_ephemeral(
        &self,
        path: &str,
    ) -> bool {
        self.tree.read().nodes.get(path).is_some_and(|n| n.owner.is_some())
    }

    /// Number of armed watches on `path`
    pub fn armed_watches(
        &self,
        path: &str,
    ) -> usize {
        self.tree.read().watches.get(path).map_or(0, Vec::len)
    }

    fn allocate_session_id(&self) -> i64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Tree {
    fn contains(
        &self,
        path: &str,
    ) -> bool {
        path == ROOT || self.nodes.contains_key(path)
    }

    fn children_of(
        &self,
        path: &str,
    ) -> Vec<String> {
        let prefix = if path == ROOT { ROOT.to_string() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn fire(
        &mut self,
        path: &str,
        kind: WatchEventKind,
    ) {
        if let Some(armed) = self.watches.remove(path) {
            trace!(path, count = armed.len(), ?kind, "firing children watches");
            for watch in armed {
                let _ = watch.tx.send(WatchEvent {
                    kind: kind.clone(),
                    path: path.to_string(),
                });
            }
        }
    }

    /// Invalidates every watch armed by `session_id`
    fn drop_session_watches(
        &mut self,
        session_id: i64,
        state: SessionState,
    ) {
        for (path, armed) in self.watches.iter_mut() {
            let (owned, kept): (Vec<_>, Vec<_>) = armed.drain(..).partition(|w| w.session_id == session_id);
            *armed = kept;
            for watch in owned {
                let _ = watch.tx.send(WatchEvent {
                    kind: WatchEventKind::Session(state),
                    path: path.clone(),
                });
            }
        }
        self.watches.retain(|_, armed| !armed.is_empty());
    }

    /// Removes every ephemeral node owned by `session_id`, notifying parents
    fn drop_session_ephemerals(
        &mut self,
        session_id: i64,
    ) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.owner == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();

        for path in &owned {
            self.nodes.remove(path);
            self.fire(&parent_of(path), WatchEventKind::NodeChildrenChanged);
        }
        owned.len()
    }
}

#[derive(Debug)]
struct SessionInner {
    id: i64,
    state: SessionState,
}

/// A session on a [`MemoryStore`]
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    inner: Mutex<SessionInner>,
}

impl MemorySession {
    /// Simulates a dropped connection. Ephemeral nodes and watches survive,
    /// round-trips fail with `ConnectionLoss` until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Connected {
            inner.state = SessionState::Disconnected;
            debug!(session_id = inner.id, "memory session disconnected");
        }
    }

    pub fn reconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Disconnected {
            inner.state = SessionState::Connected;
            debug!(session_id = inner.id, "memory session reconnected");
        }
    }

    /// Simulates server-side session expiry: ephemeral nodes are removed and
    /// this session's watches receive `Session(Expired)`. The next round-trip
    /// transparently establishes a new session.
    pub fn expire(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Expired | SessionState::Closed) {
            return;
        }
        let mut tree = self.store.tree.write();
        tree.drop_session_watches(inner.id, SessionState::Expired);
        let removed = tree.drop_session_ephemerals(inner.id);
        inner.state = SessionState::Expired;
        debug!(session_id = inner.id, removed, "memory session expired");
    }

    /// Locks the session for one round-trip, re-establishing an expired session
    fn live(&self) -> StoreResult<parking_lot::MutexGuard<'_, SessionInner>> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Connected | SessionState::Connecting => Ok(inner),
            SessionState::Disconnected => Err(StoreError::ConnectionLoss),
            SessionState::Closed => Err(StoreError::Closed),
            SessionState::Expired => {
                inner.id = self.store.allocate_session_id();
                inner.state = SessionState::Connected;
                debug!(session_id = inner.id, "memory session re-established after expiry");
                Ok(inner)
            }
        }
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn session_id(&self) -> i64 {
        self.inner.lock().id
    }

    async fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        let _session = self.live()?;
        Ok(self.store.tree.read().contains(path))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> StoreResult<String> {
        validate_path(path)?;
        let session = self.live()?;
        let mut tree = self.store.tree.write();

        if tree.contains(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !tree.contains(&parent) {
            return Err(StoreError::NoNode(parent));
        }
        if tree.nodes.get(&parent).is_some_and(|n| n.owner.is_some()) {
            return Err(StoreError::Backend(format!("ephemeral node {parent} cannot have children")));
        }

        let owner = match mode {
            CreateMode::Ephemeral => Some(session.id),
            CreateMode::Persistent => None,
        };
        tree.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
        tree.fire(&parent, WatchEventKind::NodeChildrenChanged);

        Ok(path.to_string())
    }

    async fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()> {
        validate_path(path)?;
        let _session = self.live()?;
        let mut tree = self.store.tree.write();

        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        if !tree.children_of(path).is_empty() {
            return Err(StoreError::NotEmpty(path.to_string()));
        }
        tree.nodes.remove(path);
        tree.fire(&parent_of(path), WatchEventKind::NodeChildrenChanged);
        Ok(())
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> StoreResult<Vec<u8>> {
        let _session = self.live()?;
        let tree = self.store.tree.read();
        if path == ROOT {
            return Ok(Vec::new());
        }
        tree.nodes
            .get(path)
            .map(|n| n.data.clone())
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>> {
        let _session = self.live()?;
        let tree = self.store.tree.read();
        if !tree.contains(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        Ok(tree.children_of(path))
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Vec<String>, OneshotWatch)> {
        let session = self.live()?;
        let mut tree = self.store.tree.write();
        if !tree.contains(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let armed = tree.watches.entry(path.to_string()).or_default();
        // watchers that went away without the path firing
        armed.retain(|w| !w.tx.is_closed());
        armed.push(ArmedWatch {
            session_id: session.id,
            tx,
        });
        Ok((tree.children_of(path), OneshotWatch::new(path, rx)))
    }

    async fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return Ok(());
        }
        let mut tree = self.store.tree.write();
        tree.drop_session_watches(inner.id, SessionState::Closed);
        let removed = tree.drop_session_ephemerals(inner.id);
        inner.state = SessionState::Closed;
        debug!(session_id = inner.id, removed, "memory session closed");
        Ok(())
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn validate_path(path: &str) -> StoreResult<()> {
    if !path.starts_with('/') || path == ROOT || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::Backend(format!("invalid node path {path:?}")));
    }
    Ok(())
}

//! Registration engine: ephemeral records plus the keepalive that repairs them.

use std::sync::Arc;

use nanoid::nanoid;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ensure_path;
use super::join_path;
use super::split_parent;
use super::BackgroundTask;
use super::ClientInner;
use super::DiscoveryClient;
use crate::session::CoordinationSession;
use crate::session::CreateMode;
use crate::Error;
use crate::Result;
use crate::StoreError;
use crate::StoreResult;

/// A live registration.
///
/// Dropping the handle leaves the record registered; it stays alive until
/// [`unregister`](Self::unregister) or the owning client is closed.
pub struct Registration {
    id: String,
    path: String,
    address: String,
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("address", &self.address)
            .finish()
    }
}

impl Registration {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full path of the ephemeral record
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stops the keepalive, forgets the address and deletes the record.
    ///
    /// The keepalive has exited when this returns, so the record is not
    /// re-created behind our back.
    pub async fn unregister(self) -> Result<()> {
        if self.inner.is_closed() {
            // closing the session already removed the record
            return Ok(());
        }

        if let Some(task) = self.inner.tasks.remove(&self.id) {
            task.shutdown().await;
            self.inner.report_tasks();
        }
        self.inner.self_registry.remove_if(&self.address, &self.id);

        match self.inner.session.delete(&self.path).await {
            Ok(()) => {
                info!(path = %self.path, address = %self.address, "unregistered");
                Ok(())
            }
            Err(e) if e.is_no_node() => {
                debug!(path = %self.path, "record already gone");
                Ok(())
            }
            Err(StoreError::Closed) if self.inner.is_closed() => Ok(()),
            Err(e) => {
                warn!(path = %self.path, "Failed to delete registration record: {}", e);
                Err(e.into())
            }
        }
    }
}

impl DiscoveryClient {
    /// Registers `address` under `base_path` as a fresh ephemeral record and
    /// keeps it alive across session interruptions.
    ///
    /// On failure nothing is left behind: no registry entry and no
    /// background task.
    pub async fn register_node(
        &self,
        base_path: &str,
        address: &str,
    ) -> Result<Registration> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let id = nanoid!();
        let path = join_path(base_path, &id);
        let (parent, _) = split_parent(&path);
        ensure_path(inner.session.as_ref(), &parent).await?;

        if let Err(e) = inner.session.create(&path, address.as_bytes(), CreateMode::Ephemeral).await {
            error!(%path, %address, "Failed to create registration record: {}", e);
            return Err(Error::RegistrationFailed {
                path,
                address: address.to_string(),
                source: e,
            });
        }
        let written_under = inner.session.session_id();

        inner.self_registry.insert(address, &id);
        let token = CancellationToken::new();
        let handle = tokio::spawn(keepalive_loop(
            inner.clone(),
            path.clone(),
            address.to_string(),
            written_under,
            token.clone(),
        ));
        inner.tasks.insert(id.clone(), BackgroundTask::new(token, handle));

        if inner.is_closed() {
            // close() drained the registry before our insert
            if let Some(task) = inner.tasks.remove(&id) {
                task.shutdown().await;
            }
            inner.self_registry.remove_if(address, &id);
            return Err(Error::ClientClosed);
        }
        inner.report_tasks();

        info!(%path, %address, %id, "registered");
        Ok(Registration {
            id,
            path,
            address: address.to_string(),
            inner: inner.clone(),
        })
    }
}

/// Re-creates the record whenever the session is unhealthy or has been
/// replaced since the record was last written. Ends only on cancellation.
async fn keepalive_loop(
    inner: Arc<ClientInner>,
    path: String,
    address: String,
    mut written_under: i64,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(inner.config.keepalive_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(%path, "keepalive stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let session = inner.session.as_ref();
        if session.state().is_healthy() && session.session_id() == written_under {
            continue;
        }

        debug!(%path, state = %session.state(), "attempting keepalive repair");
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(%path, "keepalive stopped during repair");
                return;
            }
            outcome = recreate(session, &path, &address) => outcome,
        };
        if outcome.is_ok() {
            written_under = session.session_id();
        }
        inner.observer.on_keepalive_repair(&path, &outcome);
    }
}

/// One repair attempt; "already exists" means the record survived
async fn recreate(
    session: &dyn CoordinationSession,
    path: &str,
    address: &str,
) -> StoreResult<()> {
    let (parent, _) = split_parent(path);
    if let Err(e) = ensure_path(session, &parent).await {
        return Err(match e {
            Error::StoreUnavailable { source } | Error::PathCreateFailed { source, .. } => source,
            other => StoreError::Backend(other.to_string()),
        });
    }

    match session.create(path, address.as_bytes(), CreateMode::Ephemeral).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_node_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

//! Watch engine.
//!
//! A watch keeps a persistent logical view of a base path on top of the
//! store's one-shot children notifications. Each watch runs one task:
//!
//! ```text
//! Armed -> NotificationReceived -> Recomputing -> Armed
//!   \______________________\____________\______-> Canceled
//! ```
//!
//! Recomputing re-arms the notification and reads the values of the
//! children listed by that re-arm, so no change can slip in between the
//! snapshot and the next notification.

use std::sync::Arc;

use nanoid::nanoid;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::ensure_path;
use super::join_path;
use super::BackgroundTask;
use super::ClientInner;
use super::DiscoveryClient;
use crate::constants::WATCH_ID_PREFIX;
use crate::session::OneshotWatch;
use crate::session::WatchEventKind;
use crate::Error;
use crate::Result;

/// One item on a watch's delivery stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressUpdate {
    /// Full address list as of the latest notification; may be empty
    Snapshot(Vec<String>),
    /// The watch was canceled; nothing follows
    Ended,
}

/// Per-watch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchPhase {
    Armed,
    NotificationReceived,
    Recomputing,
    Canceled,
}

/// Cancels one watch. Cheap to clone; cancelling twice is a no-op.
#[derive(Clone)]
pub struct WatchCancel {
    id: String,
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for WatchCancel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchCancel").field("id", &self.id).finish()
    }
}

impl WatchCancel {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stops the watch and waits for its task to exit.
    ///
    /// Nothing is delivered after this returns other than the `Ended`
    /// marker the task leaves on its way out.
    pub async fn cancel(&self) {
        if let Some(task) = self.inner.tasks.remove(&self.id) {
            task.shutdown().await;
            self.inner.report_tasks();
            debug!(id = %self.id, "watch canceled");
        }
    }
}

/// Receiving end of a watch plus its cancel handle
#[derive(Debug)]
pub struct WatchSubscription {
    path: String,
    rx: mpsc::Receiver<AddressUpdate>,
    cancel: WatchCancel,
}

impl WatchSubscription {
    pub fn id(&self) -> &str {
        self.cancel.id()
    }

    /// Watched base path, normalized
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next update; `None` once the task is gone and the buffer drained
    pub async fn recv(&mut self) -> Option<AddressUpdate> {
        self.rx.recv().await
    }

    pub async fn cancel(&self) {
        self.cancel.cancel().await
    }

    /// Splits into the raw receiver and the cancel handle
    pub fn into_parts(self) -> (mpsc::Receiver<AddressUpdate>, WatchCancel) {
        (self.rx, self.cancel)
    }

    /// Stream view of the updates. The watch keeps running until the client
    /// is closed; use [`into_parts`](Self::into_parts) to keep a cancel handle.
    pub fn into_stream(self) -> ReceiverStream<AddressUpdate> {
        ReceiverStream::new(self.rx)
    }
}

impl DiscoveryClient {
    /// Starts watching `base_path`.
    ///
    /// The first update is the current membership; afterwards one snapshot
    /// follows every children change, in notification order. Setup errors
    /// leave no task behind.
    pub async fn watch_registered_addresses(
        &self,
        base_path: &str,
    ) -> Result<WatchSubscription> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let path = ensure_path(inner.session.as_ref(), base_path).await?;
        let (children, armed) = inner
            .session
            .children_watch(&path)
            .await
            .map_err(|source| Error::WatchSetupFailed {
                path: path.clone(),
                source,
            })?;

        let id = format!("{}{}", WATCH_ID_PREFIX, nanoid!());
        let (tx, rx) = mpsc::channel(inner.config.delivery_buffer.max(1));
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_watch(
            inner.clone(),
            id.clone(),
            path.clone(),
            children,
            armed,
            tx,
            token.clone(),
        ));
        inner.tasks.insert(id.clone(), BackgroundTask::new(token, handle));

        if inner.is_closed() {
            if let Some(task) = inner.tasks.remove(&id) {
                task.shutdown().await;
            }
            return Err(Error::ClientClosed);
        }
        inner.report_tasks();

        info!(%path, %id, "watch started");
        Ok(WatchSubscription {
            path,
            rx,
            cancel: WatchCancel {
                id,
                inner: inner.clone(),
            },
        })
    }
}

async fn run_watch(
    inner: Arc<ClientInner>,
    id: String,
    path: String,
    initial: Vec<String>,
    mut armed: OneshotWatch,
    tx: mpsc::Sender<AddressUpdate>,
    token: CancellationToken,
) {
    let mut published = listing_key(&initial);
    let mut pending = Some(initial);

    loop {
        if let Some(children) = pending.take() {
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                read = read_addresses(&inner, &path, children) => read,
            };
            match read {
                Ok(addresses) => {
                    trace!(%path, ?addresses, "publishing snapshot");
                    if !deliver(&tx, &token, AddressUpdate::Snapshot(addresses)).await {
                        break;
                    }
                }
                Err(e) => inner.observer.on_watch_refresh_failed(&path, &e),
            }
        }

        trace!(%path, phase = ?WatchPhase::Armed);
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = armed.changed() => event,
        };

        let publish = event.kind == WatchEventKind::NodeChildrenChanged;
        debug!(%path, kind = ?event.kind, phase = ?WatchPhase::NotificationReceived, "watch notification");

        trace!(%path, phase = ?WatchPhase::Recomputing);
        let Some((children, next, recovered)) = rearm(&inner, &path, &token).await else {
            break;
        };
        armed = next;
        // changes made while no watch was armed fire nothing; the listing
        // is the only evidence of them
        let listing = listing_key(&children);
        if publish || recovered || listing != published {
            published = listing;
            pending = Some(children);
        }
    }

    if token.is_cancelled() {
        let _ = tx.try_send(AddressUpdate::Ended);
    } else if inner.tasks.remove(&id).is_some() {
        // consumer went away; retire our own entry
        inner.report_tasks();
    }
    debug!(%path, %id, phase = ?WatchPhase::Canceled, "watch task exited");
}

/// Re-arms the one-shot notification, retrying on the keepalive interval.
/// Returns `None` when canceled meanwhile.
async fn rearm(
    inner: &ClientInner,
    path: &str,
    token: &CancellationToken,
) -> Option<(Vec<String>, OneshotWatch, bool)> {
    let mut recovered = false;
    loop {
        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            attempt = inner.session.children_watch(path) => attempt,
        };
        match attempt {
            Ok((children, watch)) => return Some((children, watch, recovered)),
            Err(e) => {
                inner.observer.on_watch_rearm_failed(path, &e);
                recovered = true;
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(inner.config.keepalive_interval) => {}
        }
    }
}

/// Order-insensitive view of a children listing
fn listing_key(children: &[String]) -> Vec<String> {
    let mut key = children.to_vec();
    key.sort_unstable();
    key
}

/// Sends `update` unless the watch is canceled or the consumer is gone
async fn deliver(
    tx: &mpsc::Sender<AddressUpdate>,
    token: &CancellationToken,
    update: AddressUpdate,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = tx.send(update) => sent.is_ok(),
    }
}

/// Reads the value of every child and drops this client's own addresses.
///
/// A child deleted between listing and reading is skipped; the deletion
/// fires its own notification.
pub(crate) async fn read_addresses(
    inner: &ClientInner,
    path: &str,
    children: Vec<String>,
) -> Result<Vec<String>> {
    let mut addresses = Vec::with_capacity(children.len());
    for child in children {
        let child_path = join_path(path, &child);
        match inner.session.get_data(&child_path).await {
            Ok(data) => addresses.push(String::from_utf8_lossy(&data).into_owned()),
            Err(e) if e.is_no_node() => trace!(path = %child_path, "child vanished before read"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(inner.self_registry.filter(addresses))
}

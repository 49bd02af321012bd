use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::AddressConsumer;
use super::ResolveTarget;
use super::ResolvedState;
use super::Resolver;
use super::ResolverBuilder;
use crate::constants::DEFAULT_SCHEME;
use crate::AddressUpdate;
use crate::DiscoveryClient;
use crate::Result;
use crate::WatchCancel;

/// Lifecycle of a [`DiscoveryResolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Built,
    Watching,
    Closed,
}

enum Lifecycle {
    Built,
    Watching {
        cancel: WatchCancel,
        forwarder: JoinHandle<()>,
        stop: CancellationToken,
    },
    Closed,
}

/// Resolver over one watched base path
pub struct DiscoveryResolver {
    client: DiscoveryClient,
    path: String,
    consumer: Arc<dyn AddressConsumer>,
    lifecycle: RwLock<Lifecycle>,
}

impl std::fmt::Debug for DiscoveryResolver {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DiscoveryResolver").field("path", &self.path).finish_non_exhaustive()
    }
}

impl DiscoveryResolver {
    /// Starts watching `target` and forwarding snapshots to `consumer`.
    ///
    /// Fails when the watch cannot be started; nothing keeps running then.
    pub async fn start(
        client: DiscoveryClient,
        target: &ResolveTarget,
        consumer: Arc<dyn AddressConsumer>,
    ) -> Result<Self> {
        let resolver = Self {
            client,
            path: target.path().to_string(),
            consumer,
            lifecycle: RwLock::new(Lifecycle::Built),
        };

        let (rx, cancel) = resolver
            .client
            .watch_registered_addresses(&resolver.path)
            .await?
            .into_parts();
        let stop = CancellationToken::new();
        let forwarder = tokio::spawn(forward(
            resolver.path.clone(),
            rx,
            resolver.consumer.clone(),
            stop.clone(),
        ));

        *resolver.lifecycle.write().await = Lifecycle::Watching {
            cancel,
            forwarder,
            stop,
        };
        info!(path = %resolver.path, "resolver watching");
        Ok(resolver)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn state(&self) -> ResolverState {
        match *self.lifecycle.read().await {
            Lifecycle::Built => ResolverState::Built,
            Lifecycle::Watching { .. } => ResolverState::Watching,
            Lifecycle::Closed => ResolverState::Closed,
        }
    }
}

#[tonic::async_trait]
impl Resolver for DiscoveryResolver {
    /// Pushes a freshly read address set to the consumer.
    ///
    /// Holds the lifecycle read lock throughout, so it never overlaps
    /// `close`. Outside `Watching` it does nothing.
    async fn resolve_now(&self) {
        let lifecycle = self.lifecycle.read().await;
        if !matches!(*lifecycle, Lifecycle::Watching { .. }) {
            debug!(path = %self.path, "resolve_now ignored: resolver not watching");
            return;
        }

        match self.client.get_registered_addresses(&self.path).await {
            Ok(addresses) => {
                debug!(path = %self.path, ?addresses, "resolve_now");
                self.consumer.update_state(ResolvedState::from(addresses)).await;
            }
            Err(e) => self.client.inner.observer.on_resolve_now_failed(&self.path, &e),
        }
        drop(lifecycle);
    }

    async fn close(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        let Lifecycle::Watching { cancel, forwarder, stop } = std::mem::replace(&mut *lifecycle, Lifecycle::Closed)
        else {
            return;
        };

        stop.cancel();
        cancel.cancel().await;
        if let Err(e) = forwarder.await {
            warn!(path = %self.path, "resolver forwarder failed: {:?}", e);
        }
        info!(path = %self.path, "resolver closed");
    }
}

async fn forward(
    path: String,
    mut rx: tokio::sync::mpsc::Receiver<AddressUpdate>,
    consumer: Arc<dyn AddressConsumer>,
    stop: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            update = rx.recv() => update,
        };

        match update {
            Some(AddressUpdate::Snapshot(addresses)) => {
                debug!(%path, count = addresses.len(), "forwarding snapshot");
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = consumer.update_state(ResolvedState::from(addresses)) => {}
                }
            }
            Some(AddressUpdate::Ended) | None => break,
        }
    }
    debug!(%path, "resolver forwarder exited");
}

/// Builds [`DiscoveryResolver`]s over one client
#[derive(Debug, Clone)]
pub struct DiscoveryResolverBuilder {
    client: DiscoveryClient,
    scheme: String,
}

impl DiscoveryResolverBuilder {
    pub fn new(client: DiscoveryClient) -> Self {
        Self {
            client,
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    pub fn with_scheme(
        mut self,
        scheme: impl Into<String>,
    ) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Same as [`ResolverBuilder::build`] without boxing
    pub async fn build_resolver(
        &self,
        target: &ResolveTarget,
        consumer: Arc<dyn AddressConsumer>,
    ) -> Result<DiscoveryResolver> {
        DiscoveryResolver::start(self.client.clone(), target, consumer).await
    }
}

#[tonic::async_trait]
impl ResolverBuilder for DiscoveryResolverBuilder {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn build(
        &self,
        target: &ResolveTarget,
        consumer: Arc<dyn AddressConsumer>,
    ) -> Result<Box<dyn Resolver>> {
        Ok(Box::new(self.build_resolver(target, consumer).await?))
    }
}

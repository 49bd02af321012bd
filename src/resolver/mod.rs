//! Resolution adapter.
//!
//! Bridges a watch's push stream to an [`AddressConsumer`] and offers an
//! on-demand pull path, in the shape of a gRPC name resolver: builders are
//! keyed by scheme in a [`ResolverRegistry`], and each built
//! [`DiscoveryResolver`] supports `resolve_now` and `close`.

mod balance;
mod discovery_resolver;
mod target;

pub use balance::*;
pub use discovery_resolver::*;
pub use target::*;


use std::sync::Arc;

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use crate::Error;
use crate::Result;

/// One resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    pub addr: String,
}

/// Complete resolution result handed to a consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedState {
    pub addresses: Vec<ResolvedAddress>,
}

impl From<Vec<String>> for ResolvedState {
    fn from(addresses: Vec<String>) -> Self {
        Self {
            addresses: addresses.into_iter().map(|addr| ResolvedAddress { addr }).collect(),
        }
    }
}

/// Receives address sets from a resolver.
///
/// Updates from the watch and from `resolve_now` may interleave in any
/// order, so implementations must treat every call as a full replacement.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressConsumer: Send + Sync + 'static {
    async fn update_state(
        &self,
        state: ResolvedState,
    );
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Best-effort immediate refresh; never fails
    async fn resolve_now(&self);

    /// Stops delivery; no consumer call happens after this returns
    async fn close(&self);
}

#[async_trait]
pub trait ResolverBuilder: Send + Sync + 'static {
    /// Scheme token this builder answers to
    fn scheme(&self) -> &str;

    async fn build(
        &self,
        target: &ResolveTarget,
        consumer: Arc<dyn AddressConsumer>,
    ) -> Result<Box<dyn Resolver>>;
}

/// Scheme -> builder lookup used to turn target URIs into resolvers
#[derive(Default)]
pub struct ResolverRegistry {
    builders: DashMap<String, Arc<dyn ResolverBuilder>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let schemes: Vec<String> = self.builders.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ResolverRegistry").field("schemes", &schemes).finish()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder` under its scheme, replacing any previous one
    pub fn register(
        &self,
        builder: Arc<dyn ResolverBuilder>,
    ) {
        let scheme = builder.scheme().to_ascii_lowercase();
        if self.builders.insert(scheme.clone(), builder).is_some() {
            warn!(%scheme, "replaced resolver builder");
        } else {
            debug!(%scheme, "registered resolver builder");
        }
    }

    pub fn get(
        &self,
        scheme: &str,
    ) -> Option<Arc<dyn ResolverBuilder>> {
        self.builders.get(&scheme.to_ascii_lowercase()).map(|b| b.value().clone())
    }

    /// Parses `target` and builds a resolver with the builder for its scheme
    pub async fn build(
        &self,
        target: &str,
        consumer: Arc<dyn AddressConsumer>,
    ) -> Result<Box<dyn Resolver>> {
        let parsed = ResolveTarget::parse(target)?;
        let scheme = parsed
            .scheme()
            .ok_or_else(|| Error::InvalidTarget(format!("{target:?} has no scheme")))?;
        let builder = self.get(scheme).ok_or_else(|| Error::UnknownScheme(scheme.to_string()))?;
        builder.build(&parsed, consumer).await
    }
}

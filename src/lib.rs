//! Service registration and watch-driven discovery on a ZooKeeper-style
//! coordination store.
//!
//! Instances register their address as an ephemeral record under a base
//! path ([`DiscoveryClient::register_node`]); peers watch the base path
//! ([`DiscoveryClient::watch_registered_addresses`]) or plug a
//! [`DiscoveryResolver`] into a tonic balance channel. Records are repaired
//! by a keepalive after session loss, and a client never sees the addresses
//! it registered itself.
//!
//! ```ignore
//! let config = DiscoveryConfig::new()?.validate()?;
//! let discovery = ServiceDiscovery::connect(&config).await?;
//! discovery.register_service(41500, None).await?;
//!
//! let (channel, consumer) = balance_channel(64);
//! let target = ResolveTarget::parse(&discovery.target())?;
//! let resolver = discovery.resolver_builder().build_resolver(&target, Arc::new(consumer)).await?;
//! ```

mod address;
mod client;
mod config;
mod constants;
mod discovery;
mod errors;
mod metrics;
mod resolver;
pub mod session;

pub use address::*;
pub use client::*;
pub use config::*;
pub use constants::DEFAULT_SCHEME;
pub use discovery::*;
pub use errors::*;
pub use metrics::*;
pub use resolver::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

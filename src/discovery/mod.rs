//! Service-level facade: register this instance and resolve its peers.


use std::sync::Arc;

use tracing::info;

use crate::service_address;
use crate::AddressSource;
use crate::ClientConfig;
use crate::DiscoveryClient;
use crate::DiscoveryConfig;
use crate::DiscoveryResolverBuilder;
use crate::Registration;
use crate::ResolverRegistry;
use crate::Result;

/// One service's view of the coordination store
#[derive(Debug, Clone)]
pub struct ServiceDiscovery {
    client: DiscoveryClient,
    base_path: String,
    scheme: String,
    address_source: AddressSource,
}

impl ServiceDiscovery {
    /// Connects a new client for `config`
    pub async fn connect(config: &DiscoveryConfig) -> Result<Self> {
        let client = DiscoveryClient::connect(&config.store, ClientConfig::from(&config.registration)).await?;
        Self::new(client, config)
    }

    pub fn new(
        client: DiscoveryClient,
        config: &DiscoveryConfig,
    ) -> Result<Self> {
        Ok(Self {
            client,
            base_path: crate::normalize_path(&config.registration.base_path),
            scheme: config.registration.scheme.clone(),
            address_source: AddressSource::from_config(&config.address)?,
        })
    }

    pub fn client(&self) -> &DiscoveryClient {
        &self.client
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Target URI resolving this service's base path, e.g. `zk:///services`
    pub fn target(&self) -> String {
        format!("{}://{}", self.scheme, self.base_path)
    }

    /// Registers `ip:port` under the base path. The IP is `ip_override` when
    /// given, otherwise whatever the address source finds.
    pub async fn register_service(
        &self,
        port: u16,
        ip_override: Option<&str>,
    ) -> Result<Registration> {
        let ip = match ip_override {
            Some(ip) => self.address_source.clone().with_override(ip).resolve_ip().await?,
            None => self.address_source.resolve_ip().await?,
        };
        let address = service_address(&ip, port);
        info!(base_path = %self.base_path, %address, "registering service");
        self.client.register_node(&self.base_path, &address).await
    }

    /// Ends every registration and watch by closing the client
    pub async fn unregister(&self) -> Result<()> {
        self.client.close().await
    }

    pub fn resolver_builder(&self) -> DiscoveryResolverBuilder {
        DiscoveryResolverBuilder::new(self.client.clone()).with_scheme(self.scheme.clone())
    }

    /// Makes this service's scheme resolvable through `registry`
    pub fn register_resolver(
        &self,
        registry: &ResolverRegistry,
    ) {
        registry.register(Arc::new(self.resolver_builder()));
    }
}

//! Environment-derived address source.
//!
//! Works out which IP this instance advertises, in priority order:
//! 1. an explicit override
//! 2. ECS task metadata: the task IP in `awsvpc` mode, otherwise the host's
//!    private IP from EC2 instance metadata
//! 3. the first non-loopback local interface

#[cfg(test)]
mod address_test;

use std::net::IpAddr;
use std::net::Ipv6Addr;

use serde::Deserialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::AWSVPC_NETWORK_MODE;
use crate::constants::DEFAULT_EC2_METADATA_ENDPOINT;
use crate::constants::EC2_LOCAL_IPV4_PATH;
use crate::constants::EC2_METADATA_ENDPOINT_ENV;
use crate::constants::ECS_METADATA_URI_ENV;
use crate::AddressConfig;
use crate::Error;
use crate::Result;

#[derive(Debug, Deserialize)]
struct TaskMetadata {
    #[serde(rename = "Networks", default)]
    networks: Vec<TaskNetwork>,
}

#[derive(Debug, Deserialize)]
struct TaskNetwork {
    #[serde(rename = "NetworkMode", default)]
    network_mode: String,
    #[serde(rename = "IPv4Addresses", default)]
    ipv4_addresses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AddressSource {
    override_ip: Option<String>,
    ecs_metadata_uri: Option<String>,
    ec2_metadata_endpoint: String,
    http: reqwest::Client,
}

impl AddressSource {
    /// Builds a source from `config`, falling back to
    /// `ECS_CONTAINER_METADATA_URI_V4` and `EC2_METADATA_IP` for unset
    /// endpoints.
    pub fn from_config(config: &AddressConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .no_proxy()
            .build()
            .map_err(|e| Error::InvalidConfig(format!("metadata http client: {e}")))?;

        let ecs_metadata_uri = non_empty(config.ecs_metadata_uri.clone()).or_else(|| env_var(ECS_METADATA_URI_ENV));
        let ec2_metadata_endpoint = non_empty(config.ec2_metadata_endpoint.clone())
            .or_else(|| env_var(EC2_METADATA_ENDPOINT_ENV))
            .unwrap_or_else(|| DEFAULT_EC2_METADATA_ENDPOINT.to_string());

        Ok(Self {
            override_ip: non_empty(config.override_ip.clone()),
            ecs_metadata_uri,
            ec2_metadata_endpoint,
            http,
        })
    }

    pub fn with_override(
        mut self,
        ip: impl Into<String>,
    ) -> Self {
        self.override_ip = non_empty(Some(ip.into()));
        self
    }

    pub fn ecs_metadata_uri(&self) -> Option<&str> {
        self.ecs_metadata_uri.as_deref()
    }

    pub fn ec2_metadata_endpoint(&self) -> &str {
        &self.ec2_metadata_endpoint
    }

    /// The IP to advertise
    pub async fn resolve_ip(&self) -> Result<String> {
        if let Some(ip) = &self.override_ip {
            debug!(%ip, "using address override");
            return Ok(ip.clone());
        }

        if let Some(uri) = &self.ecs_metadata_uri {
            info!("Running inside ECS, getting IP from ECS metadata endpoint");
            return self.ecs_ip(uri).await;
        }

        info!("Getting first non-loopback IP from interfaces");
        first_interface_ip()
    }

    async fn ecs_ip(
        &self,
        uri: &str,
    ) -> Result<String> {
        let body = self.get(uri).await?.text().await.map_err(|e| Error::MetadataRequest {
            endpoint: uri.to_string(),
            source: e,
        })?;
        let metadata: TaskMetadata =
            serde_json::from_str(&body).map_err(|e| Error::MetadataFormat(format!("task metadata: {e}")))?;

        let network = metadata
            .networks
            .into_iter()
            .next()
            .ok_or_else(|| Error::MetadataFormat("task metadata lists no networks".to_string()))?;
        debug!(mode = %network.network_mode, "ECS network mode");

        if network.network_mode == AWSVPC_NETWORK_MODE {
            return network
                .ipv4_addresses
                .into_iter()
                .map(|ip| ip.trim().to_string())
                .find(|ip| !ip.is_empty())
                .ok_or_else(|| Error::MetadataFormat("awsvpc network has no IPv4 address".to_string()));
        }

        self.ec2_ip().await
    }

    async fn ec2_ip(&self) -> Result<String> {
        let url = format!("{}{}", self.ec2_metadata_endpoint.trim_end_matches('/'), EC2_LOCAL_IPV4_PATH);
        let body = self.get(&url).await?.text().await.map_err(|e| Error::MetadataRequest {
            endpoint: url.clone(),
            source: e,
        })?;

        let ip = body.trim();
        if ip.is_empty() {
            return Err(Error::MetadataFormat(format!("{url} returned an empty body")));
        }
        Ok(ip.to_string())
    }

    async fn get(
        &self,
        url: &str,
    ) -> Result<reqwest::Response> {
        self.http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(%url, "Failed to get metadata: {}", e);
                Error::MetadataRequest {
                    endpoint: url.to_string(),
                    source: e,
                }
            })
    }
}

/// First non-loopback interface address, skipping IPv6 link-local ones
pub fn first_interface_ip() -> Result<String> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| {
        warn!("Error while getting IP: {}", e);
        Error::NoAddressFound
    })?;

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| iface.ip())
        .find(|ip| !is_link_local_v6(ip))
        .map(|ip| ip.to_string())
        .ok_or(Error::NoAddressFound)
}

/// `ip:port`, with IPv6 addresses bracketed
pub fn service_address(
    ip: &str,
    port: u16,
) -> String {
    match ip.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{ip}]:{port}"),
        Err(_) => format!("{ip}:{port}"),
    }
}

fn is_link_local_v6(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_var(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

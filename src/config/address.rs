use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_METADATA_TIMEOUT_IN_MS;
use crate::Error;
use crate::Result;

/// Sources for the address this instance advertises.
///
/// Unset endpoints fall back to the ECS/EC2 environment variables when the
/// [`AddressSource`](crate::AddressSource) is built.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddressConfig {
    /// Explicit IP, skips every lookup
    #[serde(default)]
    pub override_ip: Option<String>,

    /// ECS task metadata endpoint (v4)
    #[serde(default)]
    pub ecs_metadata_uri: Option<String>,

    /// EC2 instance metadata base URL
    #[serde(default)]
    pub ec2_metadata_endpoint: Option<String>,

    /// Per-request timeout for metadata lookups
    #[serde(default = "default_http_timeout_in_ms")]
    pub http_timeout_in_ms: u64,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            override_ip: None,
            ecs_metadata_uri: None,
            ec2_metadata_endpoint: None,
            http_timeout_in_ms: default_http_timeout_in_ms(),
        }
    }
}

impl AddressConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ip) = &self.override_ip {
            ip.parse::<IpAddr>()
                .map_err(|_| Error::InvalidConfig(format!("address.override_ip {ip:?} is not an IP address")))?;
        }

        for (name, endpoint) in [
            ("address.ecs_metadata_uri", &self.ecs_metadata_uri),
            ("address.ec2_metadata_endpoint", &self.ec2_metadata_endpoint),
        ] {
            if let Some(url) = endpoint {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::InvalidConfig(format!("{name} {url:?} must be an http(s) URL")));
                }
            }
        }

        if self.http_timeout_in_ms == 0 {
            return Err(Error::InvalidConfig("address.http_timeout_in_ms must be greater than 0".into()));
        }

        Ok(())
    }
}

fn default_http_timeout_in_ms() -> u64 {
    DEFAULT_METADATA_TIMEOUT_IN_MS
}

use std::net::IpAddr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Prometheus `/metrics` exporter of the binary
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub prometheus_enabled: bool,

    /// Interface the exporter listens on
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: String,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            prometheus_bind: default_prometheus_bind(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    /// Listen address of the exporter
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.prometheus_bind.parse().map_err(|_| {
            Error::InvalidConfig(format!(
                "monitoring.prometheus_bind {:?} is not an IP address",
                self.prometheus_bind
            ))
        })?;
        Ok(SocketAddr::new(ip, self.prometheus_port))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            return Ok(());
        }
        if self.prometheus_port == 0 {
            return Err(Error::InvalidConfig(
                "monitoring.prometheus_port cannot be 0 when the exporter is enabled".into(),
            ));
        }
        self.listen_addr().map(|_| ())
    }
}

fn default_prometheus_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_prometheus_port() -> u16 {
    9100
}

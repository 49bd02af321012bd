use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_BASE_PATH;
use crate::constants::DEFAULT_DELIVERY_BUFFER;
use crate::constants::DEFAULT_KEEPALIVE_INTERVAL;
use crate::constants::DEFAULT_SCHEME;
use crate::normalize_path;
use crate::Error;
use crate::Result;

/// Registration, watch and resolver parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistrationConfig {
    /// Node under which every instance of the service registers
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Scheme token the resolver answers to
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// How often keepalive checks the session and repairs the record
    #[serde(default = "default_keepalive_interval_in_ms")]
    pub keepalive_interval_in_ms: u64,

    /// Address snapshots buffered per watch
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,

    /// Port the binary registers; unset means watch only
    #[serde(default)]
    pub service_port: Option<u16>,

    /// Whether the binary logs membership snapshots of `base_path`
    #[serde(default = "default_watch_members")]
    pub watch_members: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            scheme: default_scheme(),
            keepalive_interval_in_ms: default_keepalive_interval_in_ms(),
            delivery_buffer: default_delivery_buffer(),
            service_port: None,
            watch_members: default_watch_members(),
        }
    }
}

impl RegistrationConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if normalize_path(&self.base_path) == "/" {
            return Err(Error::InvalidConfig(format!(
                "registration.base_path {:?} must name at least one node",
                self.base_path
            )));
        }

        if self.scheme.is_empty()
            || !self
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(Error::InvalidConfig(format!(
                "registration.scheme {:?} is not a valid URI scheme",
                self.scheme
            )));
        }

        if self.keepalive_interval_in_ms == 0 {
            return Err(Error::InvalidConfig(
                "registration.keepalive_interval_in_ms must be greater than 0".into(),
            ));
        }

        if self.delivery_buffer == 0 {
            return Err(Error::InvalidConfig(
                "registration.delivery_buffer must be greater than 0".into(),
            ));
        }

        if self.service_port == Some(0) {
            return Err(Error::InvalidConfig("registration.service_port cannot be 0".into()));
        }

        Ok(())
    }
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

fn default_keepalive_interval_in_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_millis() as u64
}

fn default_delivery_buffer() -> usize {
    DEFAULT_DELIVERY_BUFFER
}

fn default_watch_members() -> bool {
    true
}

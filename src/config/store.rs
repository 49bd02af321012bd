use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_SESSION_TIMEOUT_IN_SECS;
use crate::constants::DEFAULT_ZK_SERVER;
use crate::Error;
use crate::Result;

/// Coordination store connection parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Ensemble members as `host:port`
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Session timeout negotiated at connect time, in seconds. 0 means the default (5s)
    #[serde(default = "default_session_timeout_in_secs")]
    pub session_timeout_in_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            session_timeout_in_secs: default_session_timeout_in_secs(),
        }
    }
}

impl StoreConfig {
    pub fn session_timeout(&self) -> Duration {
        match self.session_timeout_in_secs {
            0 => Duration::from_secs(DEFAULT_SESSION_TIMEOUT_IN_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Connect string in the `host1:port,host2:port` form store clients expect
    pub fn connect_string(&self) -> String {
        self.servers.join(",")
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::InvalidConfig("store.servers must list at least one server".into()));
        }

        if let Some(bad) = self.servers.iter().find(|s| s.trim().is_empty() || s.contains('/')) {
            return Err(Error::InvalidConfig(format!(
                "store.servers entry {bad:?} must be a bare host:port"
            )));
        }

        Ok(())
    }
}

fn default_servers() -> Vec<String> {
    vec![DEFAULT_ZK_SERVER.to_string()]
}

fn default_session_timeout_in_secs() -> u64 {
    DEFAULT_SESSION_TIMEOUT_IN_SECS
}

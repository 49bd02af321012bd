//! Configuration management for the discovery client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Component-wise validation
mod address;
mod monitoring;
mod registration;
mod store;
pub use address::*;
pub use monitoring::*;
pub use registration::*;
pub use store::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix for environment overrides, e.g. `ZKSD__STORE__SESSION_TIMEOUT_IN_SECS=10`
const ENV_PREFIX: &str = "ZKSD";

/// Main configuration container for the discovery client
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Coordination store connection settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Where and how this instance registers itself
    #[serde(default)]
    pub registration: RegistrationConfig,
    /// How the advertisable address is discovered
    #[serde(default)]
    pub address: AddressConfig,
    /// Prometheus exporter settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl DiscoveryConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `ZKSD__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied with
    /// [`with_override_config`](Self::with_override_config). Callers MUST call
    /// [`validate`](Self::validate) before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("ZKSD__REGISTRATION__BASE_PATH", "/services/billing");
    /// let cfg = DiscoveryConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.store.validate()?;
        self.registration.validate()?;
        self.address.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("store.servers")
}

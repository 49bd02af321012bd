use std::time::Duration;

// -
// Coordination store

/// Session timeout applied when the caller passes 0
pub(crate) const DEFAULT_SESSION_TIMEOUT_IN_SECS: u64 = 5;

pub(crate) const DEFAULT_ZK_SERVER: &str = "127.0.0.1:2181";

// -
// Registration and watch

pub(crate) const DEFAULT_BASE_PATH: &str = "/services";

pub(crate) const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);

/// Snapshots buffered per watch before the watch task waits on the consumer
pub(crate) const DEFAULT_DELIVERY_BUFFER: usize = 16;

pub(crate) const WATCH_ID_PREFIX: &str = "watch-";

/// Scheme token resolvers are registered under
pub const DEFAULT_SCHEME: &str = "zk";

// -
// Address discovery

pub(crate) const ECS_METADATA_URI_ENV: &str = "ECS_CONTAINER_METADATA_URI_V4";
pub(crate) const EC2_METADATA_ENDPOINT_ENV: &str = "EC2_METADATA_IP";
pub(crate) const DEFAULT_EC2_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub(crate) const EC2_LOCAL_IPV4_PATH: &str = "/latest/meta-data/local-ipv4";
pub(crate) const AWSVPC_NETWORK_MODE: &str = "awsvpc";
pub(crate) const DEFAULT_METADATA_TIMEOUT_IN_MS: u64 = 2000;

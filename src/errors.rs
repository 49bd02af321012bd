//! Service Discovery Error Hierarchy
//!
//! Errors are split by layer: [`StoreError`] is what a coordination session
//! reports for a single round-trip, [`Error`] is what callers of the
//! registration, watch and resolution APIs see.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect or round-trip failure against the coordination store
    #[error("Coordination store unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: StoreError,
    },

    /// Ancestor or record creation failed with something other than a benign "already exists"
    #[error("Failed to create node {path}: {source}")]
    PathCreateFailed {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Ephemeral record creation failed during registration
    #[error("Failed to register {address} under {path}: {source}")]
    RegistrationFailed {
        path: String,
        address: String,
        #[source]
        source: StoreError,
    },

    /// Initial arm of the children notification failed
    #[error("Failed to set watch on {path}: {source}")]
    WatchSetupFailed {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Every address source strategy was exhausted
    #[error("Could not determine an advertisable IP address")]
    NoAddressFound,

    /// HTTP lookup against a metadata endpoint failed
    #[error("Metadata request to {endpoint} failed: {source}")]
    MetadataRequest {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Metadata document did not have the expected shape
    #[error("Unexpected metadata document: {0}")]
    MetadataFormat(String),

    /// Resolver target could not be parsed into a base path
    #[error("Invalid resolver target: {0}")]
    InvalidTarget(String),

    /// No resolver builder registered for the target's scheme
    #[error("No resolver registered for scheme {0}")]
    UnknownScheme(String),

    /// The client was closed before the operation started
    #[error("Discovery client is closed")]
    ClientClosed,

    /// Configuration sources could not be merged or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration was loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("Failed to send shutdown signal: {0}")]
    SignalSenderClosed(String),
}

/// Errors reported by a [`CoordinationSession`](crate::session::CoordinationSession)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The connection dropped; the session may still be alive
    #[error("connection to the coordination store was lost")]
    ConnectionLoss,

    /// The store ended the session
    #[error("session expired")]
    SessionExpired,

    /// The session was closed locally
    #[error("session closed")]
    Closed,

    #[error("node {0} does not exist")]
    NoNode(String),

    #[error("node {0} already exists")]
    NodeExists(String),

    #[error("node {0} has children")]
    NotEmpty(String),

    /// Backend specific failure that has no dedicated variant
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Errors that only say "someone else got there first"
    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists(_))
    }

    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode(_))
    }
}

impl From<StoreError> for Error {
    fn from(source: StoreError) -> Self {
        Error::StoreUnavailable { source }
    }
}

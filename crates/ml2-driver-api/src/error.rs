//! Error taxonomy for the driver-orchestration engine.
//!
//! [`Ml2Error`] is what callers of the engine see. [`DriverError`] is what a
//! mechanism driver hook returns; the engine wraps it with the failing
//! driver's name and the phase it failed in.

use crate::{Operation, ResourceKind};
use ml2_types::{ResourceId, SegmentKey};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Ml2Result<T> = Result<T, Ml2Error>;

/// Result type alias for mechanism driver hooks.
pub type DriverResult<T> = Result<T, DriverError>;

/// Failure reported by a mechanism driver hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The driver refuses the requested state.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The driver's backend (device, controller, agent) failed.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The hook did not complete within the allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl DriverError {
    pub fn rejected(message: impl Into<String>) -> Self {
        DriverError::Rejected(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        DriverError::Backend(message.into())
    }
}

/// Errors surfaced by the engine.
#[derive(Debug, Clone, Error)]
pub enum Ml2Error {
    /// Provider segment attributes are unknown, missing, forbidden or out of range.
    #[error("Invalid segment attributes: {message}")]
    InvalidSegmentAttributes { message: String },

    /// The (physical_network, type, segmentation_id) tuple is already allocated.
    #[error("Segment {} is already in use", describe_key(.key))]
    SegmentInUse { key: SegmentKey },

    /// Every tenant-capable pool is exhausted.
    #[error("No tenant network is available for allocation")]
    NoNetworkAvailable,

    /// A mechanism driver failed during precommit; the transaction was rolled back.
    #[error("{driver} rejected {operation}_{resource}_precommit: {source}")]
    PrecommitRejected {
        driver: String,
        operation: Operation,
        resource: ResourceKind,
        #[source]
        source: DriverError,
    },

    /// A mechanism driver failed during postcommit; the record was already durable.
    #[error("{driver} failed {operation}_{resource}_postcommit: {source}")]
    PostcommitFailed {
        driver: String,
        operation: Operation,
        resource: ResourceKind,
        #[source]
        source: DriverError,
    },

    /// Transient store failure (lock timeout, serialization conflict).
    #[error("Transient store failure: {message}")]
    TransientStore { message: String },

    /// A transient failure persisted through every retry attempt.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Ml2Error>,
    },

    /// The referenced resource does not exist.
    #[error("{resource} {id} not found")]
    NotFound { resource: ResourceKind, id: ResourceId },

    /// A network cannot be deleted while ports reference it.
    #[error("Network {id} is in use by {ports} port(s)")]
    NetworkInUse { id: ResourceId, ports: usize },

    /// The request is malformed independent of segment attributes.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Driver or engine configuration is inconsistent.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn describe_key(key: &SegmentKey) -> String {
    let mut out = key.network_type.to_string();
    if let Some(physnet) = &key.physical_network {
        out.push(':');
        out.push_str(physnet);
    }
    if let Some(id) = key.segmentation_id {
        out.push(':');
        out.push_str(&id.to_string());
    }
    out
}

impl Ml2Error {
    pub fn invalid_segment(message: impl Into<String>) -> Self {
        Ml2Error::InvalidSegmentAttributes {
            message: message.into(),
        }
    }

    pub fn segment_in_use(key: SegmentKey) -> Self {
        Ml2Error::SegmentInUse { key }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Ml2Error::TransientStore {
            message: message.into(),
        }
    }

    pub fn not_found(resource: ResourceKind, id: ResourceId) -> Self {
        Ml2Error::NotFound { resource, id }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Ml2Error::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Ml2Error::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Ml2Error::TransientStore { .. })
    }

    /// Name of the mechanism driver responsible for this error, if any.
    pub fn driver(&self) -> Option<&str> {
        match self {
            Ml2Error::PrecommitRejected { driver, .. } | Ml2Error::PostcommitFailed { driver, .. } => {
                Some(driver)
            }
            _ => None,
        }
    }
}

//! Lab lifecycle orchestration for labmachine.
//!
//! This crate ties together the state descriptor schema, the state store, and
//! the provider registry into the `LabController`: the central API for
//! initializing a lab, provisioning its instance and DNS binding, reconciling
//! drift against what providers report, tearing it down, and managing its
//! volumes. It also provides volume lifecycle validation and the Ctrl-C
//! cancellation flag observed while waiting for instances to boot.

pub mod concurrency;
pub mod controller;
pub mod lifecycle;
pub mod reconcile;

pub use concurrency::{clear_shutdown, install_signal_handler, request_shutdown, shutdown_requested};
pub use controller::{
    list_images, list_locations, list_sizes, list_zones, ControllerOptions, InitOutcome,
    InitParams, LabController, LabHandle, LabOptions,
};
pub use lifecycle::validate_volume_transition;
pub use reconcile::{DriftEntry, FetchReport};

use labmachine_providers::{ProviderError, ProviderKind};
use labmachine_remote::{GcsBackend, GcsConfig, HttpBackend, RemoteConfig};
use labmachine_schema::{SchemaError, VolumeStatus};
use labmachine_store::{StateLocator, StateStore, StoreError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Provider call that failed, for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Get,
    Delete,
    Resize,
    Find,
    List,
    Configure,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Get => write!(f, "get"),
            Operation::Delete => write!(f, "delete"),
            Operation::Resize => write!(f, "resize"),
            Operation::Find => write!(f, "find"),
            Operation::List => write!(f, "list"),
            Operation::Configure => write!(f, "configure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    DnsRecord,
    Volume,
    ProviderVolume,
    Locations,
    Sizes,
    Images,
    Zones,
    Driver,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Instance => write!(f, "instance"),
            ResourceKind::DnsRecord => write!(f, "DNS record"),
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::ProviderVolume => write!(f, "provider volume"),
            ResourceKind::Locations => write!(f, "locations"),
            ResourceKind::Sizes => write!(f, "machine sizes"),
            ResourceKind::Images => write!(f, "images"),
            ResourceKind::Zones => write!(f, "DNS zones"),
            ResourceKind::Driver => write!(f, "driver"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LabError {
    #[error("unknown {kind} provider '{code}'")]
    UnknownProvider { kind: ProviderKind, code: String },
    #[error("no lab state at {0}")]
    StateNotFound(String),
    #[error("lab '{lab}': {resource} '{name}' already exists")]
    AlreadyExists {
        lab: String,
        resource: ResourceKind,
        name: String,
    },
    #[error("lab '{lab}' is already provisioned with instance '{instance}'")]
    AlreadyProvisioned { lab: String, instance: String },
    #[error("lab '{lab}': {resource} '{name}' not found")]
    NotFound {
        lab: String,
        resource: ResourceKind,
        name: String,
    },
    #[error("lab '{lab}': instance '{instance}' not running after {minutes} minutes")]
    ProvisionTimeout {
        lab: String,
        instance: String,
        minutes: u64,
    },
    #[error("lab '{lab}': delete DNS record '{record}' failed, instance left in place: {source}")]
    PartialDestroy {
        lab: String,
        record: String,
        source: ProviderError,
    },
    #[error("stale write to {locator}: pushed from version {expected}, store is at version {found}")]
    StaleWrite {
        locator: String,
        expected: u64,
        found: u64,
    },
    #[error("lab '{lab}': {operation} {resource} failed: {source}")]
    Provider {
        lab: String,
        operation: Operation,
        resource: ResourceKind,
        source: ProviderError,
    },
    #[error("{0}")]
    InvalidName(SchemaError),
    #[error("invalid volume transition: {from} -> {to}")]
    InvalidTransition { from: VolumeStatus, to: VolumeStatus },
    #[error("store error: {0}")]
    Store(StoreError),
}

impl LabError {
    /// Wrap a driver error with the lab, operation, and resource it concerns.
    pub fn provider(
        lab: &str,
        operation: Operation,
        resource: ResourceKind,
        source: ProviderError,
    ) -> Self {
        match source {
            ProviderError::UnknownProvider { kind, code } => LabError::UnknownProvider { kind, code },
            source => LabError::Provider {
                lab: lab.to_owned(),
                operation,
                resource,
                source,
            },
        }
    }

    /// Errors about the state document rather than the cloud.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            LabError::StateNotFound(_) | LabError::StaleWrite { .. } | LabError::Store(_)
        )
    }

    /// Errors reported by, or about, a provider.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            LabError::UnknownProvider { .. }
                | LabError::Provider { .. }
                | LabError::ProvisionTimeout { .. }
                | LabError::PartialDestroy { .. }
        )
    }
}

impl From<StoreError> for LabError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(locator) => LabError::StateNotFound(locator),
            StoreError::StaleWrite {
                locator,
                expected,
                found,
            } => LabError::StaleWrite {
                locator,
                expected,
                found,
            },
            other => LabError::Store(other),
        }
    }
}

impl From<SchemaError> for LabError {
    fn from(err: SchemaError) -> Self {
        LabError::InvalidName(err)
    }
}

/// Open the state store named by a locator string.
///
/// `http://` and `https://` locators use the remote backend, with the bearer
/// token taken from `LABMACHINE_REMOTE_TOKEN`. `gs://bucket/object` locators
/// use Cloud Storage with the GCE access token. Anything else is a file path.
pub fn open_store(locator: &str) -> Result<StateStore, LabError> {
    match StateLocator::parse(locator)? {
        StateLocator::File(path) => Ok(StateStore::file(path)),
        StateLocator::Http(url) => Ok(StateStore::new(Box::new(HttpBackend::new(
            RemoteConfig::from_env(&url),
        )))),
        StateLocator::Gcs { bucket, object } => Ok(StateStore::new(Box::new(GcsBackend::new(
            GcsConfig::from_env(&bucket, &object),
        )))),
    }
}

//! Provider capability contracts and drivers for labmachine.
//!
//! Compute and DNS providers are separate trait objects (`ComputeDriver`,
//! `DnsDriver`) so a lab can mix them. The `ProviderRegistry` maps provider
//! codes to driver factories; the built-in codes are `mock` (an in-process
//! simulated cloud with fault injection) and `gce` (Compute Engine and Cloud
//! DNS over their REST APIs).

pub mod compute;
pub mod dns;
pub mod gce;
pub mod mock;
pub mod registry;

pub use compute::{
    BootImage, ComputeDriver, InstanceSpec, Location, MachineSize, ProviderInstance,
    ProviderInstanceState, ProviderVolume,
};
pub use dns::{DnsDriver, DnsRecord, DnsZone};
pub use mock::{MockCloud, MockCompute, MockDns, MockFaults};
pub use registry::{ComputeFactory, DnsFactory, ProviderKind, ProviderRegistry, ProviderSettings};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown {kind} provider '{code}'")]
    UnknownProvider { kind: ProviderKind, code: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("provider API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("provider configuration error: {0}")]
    Config(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

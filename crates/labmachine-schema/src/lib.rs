//! Lab state descriptor schema for labmachine.
//!
//! This crate defines the data model shared by every other crate: the
//! `LabState` descriptor (the single source of truth for one lab), its
//! optional `InstanceState`, the per-lab `VolumeRecord` table, string
//! newtypes for provider-assigned identifiers, and name validation rules.
//! It performs no I/O.

pub mod names;
pub mod state;
pub mod types;
pub mod volume;

pub use names::{validate_name, NameKind};
pub use state::{InstanceState, InstanceStatus, LabState};
pub use types::{InstanceId, ProviderCode, RecordId, ZoneId};
pub use volume::{VolumeRecord, VolumeStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: NameKind,
        name: String,
        reason: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
